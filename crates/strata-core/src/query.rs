//! Query filters, sorting, update patches, and batch manifests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::item::{MemoryItem, MemoryItemType, MemoryTier};

/// Field a query result set is sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    LastAccessed,
    Importance,
    AccessCount,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Inclusive time range over `created_at`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Exact-match filter applied by `query()` and as the exact half of a
/// semantic query
///
/// All populated conditions must hold; an empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Restrict to these tiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers: Option<Vec<MemoryTier>>,

    /// Restrict to these item types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<MemoryItemType>>,

    /// Item must carry every listed tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Restrict `created_at` to this range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,

    /// Minimum importance, inclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<f64>,

    /// Sort field; unsorted (insertion order) when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortField>,

    /// Sort direction, descending by default
    #[serde(default)]
    pub sort_order: SortOrder,

    /// Number of leading results to skip
    #[serde(default)]
    pub offset: usize,

    /// Maximum number of results; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: restrict to one tier
    pub fn with_tier(mut self, tier: MemoryTier) -> Self {
        self.tiers.get_or_insert_with(Vec::new).push(tier);
        self
    }

    /// Builder: restrict to one item type
    pub fn with_type(mut self, item_type: MemoryItemType) -> Self {
        self.types.get_or_insert_with(Vec::new).push(item_type);
        self
    }

    /// Builder: require a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.get_or_insert_with(Vec::new).push(tag.into());
        self
    }

    /// Builder: set the time range
    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange { start, end });
        self
    }

    /// Builder: set the minimum importance
    pub fn with_min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    /// Builder: set sorting
    pub fn sorted_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = Some(field);
        self.sort_order = order;
        self
    }

    /// Builder: set pagination
    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// True when the item satisfies every populated condition
    pub fn matches(&self, item: &MemoryItem) -> bool {
        if let Some(tiers) = &self.tiers {
            if !tiers.contains(&item.tier) {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.contains(&item.item_type) {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !item.has_all_tags(tags) {
                return false;
            }
        }
        if let Some(range) = &self.time_range {
            if !range.contains(item.created_at) {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if item.importance < min {
                return false;
            }
        }
        true
    }

    /// Filter, sort, and paginate a snapshot of items.
    ///
    /// This is the shared query path for map-based backends; the vector
    /// backend applies `matches` to its candidate set instead.
    pub fn apply(&self, items: impl IntoIterator<Item = MemoryItem>) -> Vec<MemoryItem> {
        let mut matched: Vec<MemoryItem> =
            items.into_iter().filter(|i| self.matches(i)).collect();

        if let Some(field) = self.sort_by {
            sort_items(&mut matched, field, self.sort_order);
        }

        let offset = self.offset.min(matched.len());
        let mut page: Vec<MemoryItem> = matched.split_off(offset);
        if let Some(limit) = self.limit {
            page.truncate(limit);
        }
        page
    }
}

/// Sort items in place by the given field and direction
pub fn sort_items(items: &mut [MemoryItem], field: SortField, order: SortOrder) {
    items.sort_by(|a, b| {
        let ord = match field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::LastAccessed => a.last_accessed.cmp(&b.last_accessed),
            SortField::Importance => a
                .importance
                .partial_cmp(&b.importance)
                .unwrap_or(std::cmp::Ordering::Equal),
            SortField::AccessCount => a.access_count.cmp(&b.access_count),
        };
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

/// A semantic (vector-similarity) query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticQuery {
    /// Exact conditions applied to candidates
    #[serde(default)]
    pub filter: QueryFilter,

    /// Query embedding; must match the backend's dimension
    pub embedding: Vec<f32>,

    /// Optional query text, scored against item content by the
    /// text-overlap component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Results with similarity below this value are excluded
    #[serde(default)]
    pub similarity_threshold: f64,

    /// Weight of the similarity component in the fused score
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    /// Weight of the exact/text component in the fused score
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,

    /// Maximum result count
    #[serde(default = "default_semantic_limit")]
    pub limit: usize,
}

fn default_vector_weight() -> f64 {
    0.7
}

fn default_text_weight() -> f64 {
    0.3
}

fn default_semantic_limit() -> usize {
    10
}

impl SemanticQuery {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            filter: QueryFilter::default(),
            embedding,
            text: None,
            similarity_threshold: 0.0,
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
            limit: default_semantic_limit(),
        }
    }

    /// Builder: set the exact filter
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Builder: set the query text
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Builder: set the similarity threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Builder: set the fusion weights
    pub fn with_weights(mut self, vector_weight: f64, text_weight: f64) -> Self {
        self.vector_weight = vector_weight;
        self.text_weight = text_weight;
        self
    }

    /// Builder: set the result limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Brute-force semantic scan over a backend's item map.
    ///
    /// Skips expired and unembedded items, gates on the similarity
    /// threshold, ranks by the fused similarity/text score, and bumps
    /// access stats on the returned items. Map-based backends use this
    /// as their semantic path; the vector backend searches its graph
    /// instead.
    pub fn scan(
        &self,
        items: &mut HashMap<String, MemoryItem>,
    ) -> Vec<(MemoryItem, f64)> {
        let now = Utc::now();
        let mut scored: Vec<(String, f64, f64)> = items
            .values()
            .filter(|i| !i.is_expired(now) && self.filter.matches(i))
            .filter_map(|item| {
                let embedding = item.embedding.as_ref()?;
                let distance =
                    crate::similarity::SimilarityMetric::Cosine.distance(&self.embedding, embedding);
                let similarity = crate::similarity::similarity_from_distance(distance);
                if similarity < self.similarity_threshold {
                    return None;
                }
                let text = self
                    .text
                    .as_deref()
                    .map(|t| crate::similarity::text_overlap(t, &item.content))
                    .unwrap_or(1.0);
                let fused = similarity * self.vector_weight + text * self.text_weight;
                Some((item.id.clone(), similarity, fused))
            })
            .collect();

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.limit);

        let mut results = Vec::with_capacity(scored.len());
        for (id, similarity, _) in scored {
            if let Some(item) = items.get_mut(&id) {
                item.touch();
                results.push((item.clone(), similarity));
            }
        }
        results
    }
}

/// Partial update merged into an existing item by `update()`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<MemoryTier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,

    /// Entries merged key-by-key into the item's metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl UpdatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn tier(mut self, tier: MemoryTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// True when the patch carries no changes
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.embedding.is_none()
            && self.importance.is_none()
            && self.tier.is_none()
            && self.ttl.is_none()
            && self.metadata.is_none()
    }

    /// Merge this patch into an item. Returns true when `content` or
    /// `embedding` changed, which obliges vector backends to re-index.
    pub fn apply_to(&self, item: &mut MemoryItem) -> bool {
        let mut reindex = false;
        if let Some(content) = &self.content {
            if *content != item.content {
                reindex = true;
            }
            item.content = content.clone();
        }
        if let Some(embedding) = &self.embedding {
            reindex = true;
            item.embedding = Some(embedding.clone());
        }
        if let Some(importance) = self.importance {
            item.importance = importance;
        }
        if let Some(tier) = self.tier {
            item.tier = tier;
        }
        if let Some(ttl) = self.ttl {
            item.ttl = Some(ttl);
        }
        if let Some(metadata) = &self.metadata {
            for (k, v) in metadata {
                item.metadata.insert(k.clone(), v.clone());
            }
        }
        reindex
    }
}

/// Outcome of one item within a batch operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub id: String,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Per-item manifest returned by batch operations; a batch never
/// collapses into an all-or-nothing outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
    pub duration_ms: u64,
}

impl BatchResult {
    pub fn new(entries: Vec<BatchEntry>, duration: Duration) -> Self {
        Self {
            entries,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.success).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.success)
    }
}
