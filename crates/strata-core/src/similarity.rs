//! Vector distance and similarity math
//!
//! All functions operate on plain `&[f32]` slices. Length mismatches are
//! handled defensively at this level; backends validate dimensions before
//! any write, so mismatches here only occur on already-rejected paths.

use serde::{Deserialize, Serialize};

/// Distance metric used by a vector backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine distance, `1 - cosine_similarity` (default, good for text)
    #[default]
    Cosine,
    /// Euclidean (L2) distance
    Euclidean,
    /// Dot-product distance, `1 - dot` (for normalized vectors)
    Dot,
}

impl SimilarityMetric {
    /// Distance between two vectors under this metric. Lower is closer.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => 1.0 - cosine_similarity(a, b),
            SimilarityMetric::Euclidean => euclidean_distance(a, b),
            SimilarityMetric::Dot => 1.0 - dot_product(a, b),
        }
    }

    /// Snake-case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Euclidean => "euclidean",
            SimilarityMetric::Dot => "dot",
        }
    }
}

impl std::fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a metric distance into the similarity score reported to
/// callers of semantic queries
pub fn similarity_from_distance(distance: f32) -> f64 {
    1.0 - distance as f64
}

/// Cosine similarity between two vectors
///
/// Returns a value between -1 and 1, where 1 means identical direction,
/// 0 means orthogonal, and -1 means opposite direction.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Dot product between two vectors
///
/// For normalized vectors this equals cosine similarity.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean distance between two vectors
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Normalize a vector to unit length in place
pub fn normalize(v: &mut [f32]) {
    let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in v.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Fraction of query tokens present in the content, both lowercased.
/// Scores the exact/text half of a fused semantic query; an empty query
/// matches everything with full score.
pub fn text_overlap(query: &str, content: &str) -> f64 {
    let tokens: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();
    if tokens.is_empty() {
        return 1.0;
    }
    let content = content.to_lowercase();
    let hits = tokens.iter().filter(|t| content.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

/// Rank candidates by ascending distance to `query` and keep the `k`
/// nearest. Used by the brute-force semantic path of map-based backends.
pub fn top_k_by_distance<T, F>(
    query: &[f32],
    items: impl IntoIterator<Item = T>,
    k: usize,
    metric: SimilarityMetric,
    get_embedding: F,
) -> Vec<(T, f32)>
where
    F: Fn(&T) -> Option<Vec<f32>>,
{
    let mut scored: Vec<(T, f32)> = items
        .into_iter()
        .filter_map(|item| {
            get_embedding(&item).map(|emb| {
                let d = metric.distance(query, &emb);
                (item, d)
            })
        })
        .collect();

    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cosine_similarity_basic() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];

        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((euclidean_distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_distances() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];

        assert!(SimilarityMetric::Cosine.distance(&a, &b).abs() < 1e-6);
        assert!(SimilarityMetric::Euclidean.distance(&a, &b).abs() < 1e-6);
        assert!(SimilarityMetric::Dot.distance(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_text_overlap() {
        assert_eq!(text_overlap("dark mode", "User prefers dark mode"), 1.0);
        assert_eq!(text_overlap("dark theme", "User prefers dark mode"), 0.5);
        assert_eq!(text_overlap("", "anything"), 1.0);
        assert_eq!(text_overlap("missing", "other content"), 0.0);
    }

    #[test]
    fn test_top_k_by_distance() {
        let query = vec![1.0, 0.0];
        let items = vec![
            ("far", vec![0.0, 1.0]),
            ("near", vec![0.9, 0.1]),
            ("exact", vec![1.0, 0.0]),
        ];

        let top = top_k_by_distance(&query, items, 2, SimilarityMetric::Cosine, |(_, e)| {
            Some(e.clone())
        });

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0.0, "exact");
        assert_eq!(top[1].0.0, "near");
    }

    proptest! {
        #[test]
        fn prop_self_similarity_is_one(v in proptest::collection::vec(-100.0f32..100.0, 1..32)) {
            prop_assume!(v.iter().any(|x| x.abs() > 1e-3));
            let sim = cosine_similarity(&v, &v);
            prop_assert!((sim - 1.0).abs() < 1e-3);
        }

        #[test]
        fn prop_euclidean_self_distance_is_zero(v in proptest::collection::vec(-100.0f32..100.0, 1..32)) {
            prop_assert!(euclidean_distance(&v, &v).abs() < 1e-3);
        }

        #[test]
        fn prop_normalized_magnitude(v in proptest::collection::vec(-100.0f32..100.0, 1..32)) {
            prop_assume!(v.iter().any(|x| x.abs() > 1e-3));
            let mut v = v;
            normalize(&mut v);
            let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            prop_assert!((magnitude - 1.0).abs() < 1e-3);
        }
    }
}
