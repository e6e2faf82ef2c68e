//! HNSW (Hierarchical Navigable Small World) graph
//!
//! Approximate nearest-neighbor index with logarithmic search over a
//! multi-layer proximity graph. Nodes live in an arena of slots: neighbor
//! lists hold slot indices, a free list recycles slots after deletion,
//! and external string ids appear only at the API boundary and in
//! snapshots.
//!
//! # References
//!
//! - Malkov, Y. A., & Yashunin, D. A. (2018). Efficient and robust
//!   approximate nearest neighbor search using Hierarchical Navigable
//!   Small World graphs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use strata_core::similarity::SimilarityMetric;
use strata_core::{Error, Result};

/// Configuration for the HNSW graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Vector dimension; every vector in one graph has this length
    pub dimension: usize,

    /// Maximum connections per node per layer (default: 16)
    pub m: usize,

    /// Candidate breadth during construction (default: 200)
    pub ef_construction: usize,

    /// Candidate breadth during search (default: 50)
    /// Higher values improve recall but slow down search
    pub ef_search: usize,

    /// Maximum number of layers in the graph
    pub max_level: usize,

    /// Distance metric
    pub metric: SimilarityMetric,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_level: 16,
            metric: SimilarityMetric::Cosine,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Builder: set the max connections per layer
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    /// Builder: set the distance metric
    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Builder: set the search-time candidate breadth
    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search;
        self
    }

    /// Builder: set the layer cap
    pub fn with_max_level(mut self, max_level: usize) -> Self {
        self.max_level = max_level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::InvalidConfig(
                "vector dimension must be at least 1".to_string(),
            ));
        }
        if self.m < 2 {
            return Err(Error::InvalidConfig(
                "m must be at least 2".to_string(),
            ));
        }
        if self.ef_search == 0 {
            return Err(Error::InvalidConfig(
                "ef_search must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Level-generation multiplier, `1 / ln(M)`
    fn ml(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

/// A graph node held in an arena slot
#[derive(Debug, Clone)]
struct Node {
    id: String,
    vector: Vec<f32>,
    level: usize,
    /// Neighbor slot indices for every layer `0..=level`
    neighbors: Vec<Vec<usize>>,
}

/// Serialized node form: neighbor lists hold external ids so snapshots
/// survive arena reshuffling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub vector: Vec<f32>,
    pub level: usize,
    pub connections: BTreeMap<u32, Vec<String>>,
}

/// A search candidate ordered nearest-first in a `BinaryHeap`
#[derive(Debug, Clone)]
struct Candidate {
    distance: f32,
    slot: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.slot == other.slot
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the heap pops the smallest distance first
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// A result-set entry ordered furthest-first, so the cap evicts the
/// worst admitted result
#[derive(Debug, Clone)]
struct MaxCandidate {
    distance: f32,
    slot: usize,
}

impl PartialEq for MaxCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.slot == other.slot
    }
}

impl Eq for MaxCandidate {}

impl PartialOrd for MaxCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MaxCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// HNSW graph over an arena of nodes
///
/// Not internally synchronized; the owning backend serializes access.
#[derive(Debug)]
pub struct HnswGraph {
    config: HnswConfig,
    /// Arena; `None` marks a freed slot awaiting reuse
    slots: Vec<Option<Node>>,
    /// Freed slot indices
    free: Vec<usize>,
    /// External id to arena slot
    slot_by_id: HashMap<String, usize>,
    /// Slot of the entry point, the start of every descent
    entry: Option<usize>,
    rng: StdRng,
}

impl HnswGraph {
    pub fn new(config: HnswConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            free: Vec::new(),
            slot_by_id: HashMap::new(),
            entry: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic level draws for tests and reproducible builds
    pub fn with_seed(config: HnswConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.slot_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_by_id.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slot_by_id.contains_key(id)
    }

    /// The stored vector for an id
    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        let slot = *self.slot_by_id.get(id)?;
        self.node(slot).map(|n| n.vector.as_slice())
    }

    /// External id of the current entry point
    pub fn entry_point(&self) -> Option<&str> {
        self.entry
            .and_then(|slot| self.node(slot))
            .map(|n| n.id.as_str())
    }

    /// Iterate live nodes as `(id, vector)`
    pub fn iter_vectors(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .map(|n| (n.id.as_str(), n.vector.as_slice()))
    }

    fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.slots.get_mut(slot).and_then(|s| s.as_mut())
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.config.metric.distance(a, b)
    }

    /// Geometric level draw biased toward layer 0
    fn random_level(&mut self) -> usize {
        let u: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = (-u.ln() * self.config.ml()) as usize;
        level.min(self.config.max_level)
    }

    /// Insert a vector under an external id. Re-inserting an existing id
    /// replaces its node.
    pub fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                found: vector.len(),
            });
        }

        if self.contains(id) {
            self.remove(id);
        }

        let level = self.random_level();
        let query = vector.clone();
        let slot = self.alloc(Node {
            id: id.to_string(),
            vector,
            level,
            neighbors: vec![Vec::new(); level + 1],
        });
        self.slot_by_id.insert(id.to_string(), slot);

        let Some(entry_slot) = self.entry else {
            self.entry = Some(slot);
            return Ok(());
        };
        let entry_level = self.node(entry_slot).map(|n| n.level).unwrap_or(0);

        // Greedy descent through the layers above the new node's level
        let mut ep = entry_slot;
        for layer in (level + 1..=entry_level).rev() {
            if let Some(nearest) = self.search_layer(&query, ep, 1, layer).into_iter().next() {
                ep = nearest.slot;
            }
        }

        // Connect on every shared layer. The beam width equals `m`, so
        // the new node's own lists never overflow here; only existing
        // neighbors can exceed `m` and get pruned.
        for layer in (0..=level.min(entry_level)).rev() {
            let found = self.search_layer(&query, ep, self.config.m, layer);
            if let Some(nearest) = found.first() {
                ep = nearest.slot;
            }
            let neighbor_slots: Vec<usize> = found.into_iter().map(|c| c.slot).collect();
            self.connect(slot, &neighbor_slots, layer);
        }

        if level > entry_level {
            self.entry = Some(slot);
        }
        Ok(())
    }

    /// Search for the `k` nearest neighbors. Returns external ids with
    /// their distances, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                found: query.len(),
            });
        }

        let Some(entry_slot) = self.entry else {
            return Ok(Vec::new());
        };
        let top = self.node(entry_slot).map(|n| n.level).unwrap_or(0);

        // Greedy one-hop descent to layer 1
        let mut ep = entry_slot;
        for layer in (1..=top).rev() {
            if let Some(nearest) = self.search_layer(query, ep, 1, layer).into_iter().next() {
                ep = nearest.slot;
            }
        }

        let ef = self.config.ef_search.max(k);
        let found = self.search_layer(query, ep, ef, 0);
        Ok(found
            .into_iter()
            .take(k)
            .filter_map(|c| self.node(c.slot).map(|n| (n.id.clone(), c.distance)))
            .collect())
    }

    /// Bounded beam search within one layer.
    ///
    /// Keeps a visited set, a nearest-first candidate heap, and a
    /// furthest-first result heap capped at `ef`; stops once the best
    /// remaining candidate cannot beat the worst admitted result.
    /// Returns candidates sorted by ascending distance.
    fn search_layer(
        &self,
        query: &[f32],
        entry: usize,
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let Some(entry_node) = self.node(entry) else {
            return Vec::new();
        };
        let entry_dist = self.distance(query, &entry_node.vector);

        let mut visited: HashSet<usize> = HashSet::new();
        visited.insert(entry);

        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        candidates.push(Candidate {
            distance: entry_dist,
            slot: entry,
        });

        let mut results: BinaryHeap<MaxCandidate> = BinaryHeap::new();
        results.push(MaxCandidate {
            distance: entry_dist,
            slot: entry,
        });

        while let Some(current) = candidates.pop() {
            let furthest = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
            if current.distance > furthest && results.len() >= ef {
                break;
            }

            let Some(node) = self.node(current.slot) else {
                continue;
            };
            let Some(neighbors) = node.neighbors.get(layer) else {
                continue;
            };

            for &neighbor_slot in neighbors {
                if !visited.insert(neighbor_slot) {
                    continue;
                }
                let Some(neighbor) = self.node(neighbor_slot) else {
                    continue;
                };

                let dist = self.distance(query, &neighbor.vector);
                let furthest = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
                if dist < furthest || results.len() < ef {
                    candidates.push(Candidate {
                        distance: dist,
                        slot: neighbor_slot,
                    });
                    results.push(MaxCandidate {
                        distance: dist,
                        slot: neighbor_slot,
                    });
                    while results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results
            .into_iter()
            .map(|r| Candidate {
                distance: r.distance,
                slot: r.slot,
            })
            .collect();
        out.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        out
    }

    /// Bidirectionally link a freshly inserted node to its beam of
    /// neighbors at one layer. A neighbor whose list overflows `m` is
    /// pruned back to its `m` nearest; the new node's own list is not
    /// independently checked.
    fn connect(&mut self, slot: usize, neighbors: &[usize], layer: usize) {
        let m = self.config.m;
        for &neighbor_slot in neighbors {
            if neighbor_slot == slot {
                continue;
            }

            if let Some(node) = self.node_mut(slot) {
                if let Some(list) = node.neighbors.get_mut(layer) {
                    if !list.contains(&neighbor_slot) {
                        list.push(neighbor_slot);
                    }
                }
            }

            let overflow = match self.node_mut(neighbor_slot) {
                Some(neighbor) => match neighbor.neighbors.get_mut(layer) {
                    Some(list) => {
                        if !list.contains(&slot) {
                            list.push(slot);
                        }
                        list.len() > m
                    }
                    None => false,
                },
                None => false,
            };
            if overflow {
                self.prune(neighbor_slot, layer);
            }
        }
    }

    /// Shrink one node's layer list to its `m` nearest neighbors, by
    /// recomputed true distance
    fn prune(&mut self, slot: usize, layer: usize) {
        let m = self.config.m;
        let Some(node) = self.node(slot) else {
            return;
        };
        let base = node.vector.clone();
        let Some(list) = node.neighbors.get(layer) else {
            return;
        };

        let mut scored: Vec<(usize, f32)> = list
            .iter()
            .filter_map(|&n| {
                self.node(n)
                    .map(|other| (n, self.distance(&base, &other.vector)))
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(m);

        if let Some(node) = self.node_mut(slot) {
            if let Some(list) = node.neighbors.get_mut(layer) {
                *list = scored.into_iter().map(|(n, _)| n).collect();
            }
        }
    }

    /// Remove a node. Scrubs its slot index out of every neighbor list
    /// and re-elects the entry point when it was the removed node.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(slot) = self.slot_by_id.remove(id) else {
            return false;
        };
        let removed = self.slots.get_mut(slot).and_then(|s| s.take());
        if removed.is_none() {
            return false;
        }

        // Pruning drops reverse edges, so stale references to this slot
        // can sit in any list, not just its own neighbors'. Scrub them
        // all before the slot is recycled.
        for occupied in self.slots.iter_mut().filter_map(|s| s.as_mut()) {
            for list in occupied.neighbors.iter_mut() {
                list.retain(|&n| n != slot);
            }
        }
        self.free.push(slot);

        if self.entry == Some(slot) {
            self.reelect_entry();
        }
        true
    }

    /// Entry re-election: the remaining node with the highest level wins,
    /// ties broken by the smallest id.
    fn reelect_entry(&mut self) {
        self.entry = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.as_ref().map(|n| (slot, n)))
            .max_by(|(_, a), (_, b)| a.level.cmp(&b.level).then_with(|| b.id.cmp(&a.id)))
            .map(|(slot, _)| slot);
    }

    /// Drop every node
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.slot_by_id.clear();
        self.entry = None;
    }

    /// Wire-form nodes sorted by id, neighbor lists as external ids
    pub fn snapshot_nodes(&self) -> Vec<(String, NodeSnapshot)> {
        let mut nodes: Vec<(String, NodeSnapshot)> = self
            .slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .map(|node| {
                let mut connections = BTreeMap::new();
                for (layer, list) in node.neighbors.iter().enumerate() {
                    let ids: Vec<String> = list
                        .iter()
                        .filter_map(|&n| self.node(n).map(|other| other.id.clone()))
                        .collect();
                    connections.insert(layer as u32, ids);
                }
                (
                    node.id.clone(),
                    NodeSnapshot {
                        id: node.id.clone(),
                        vector: node.vector.clone(),
                        level: node.level,
                        connections,
                    },
                )
            })
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        nodes
    }

    /// Rebuild a graph from snapshot nodes. Connections referencing
    /// unknown ids are dropped; the caller validates the entry point and
    /// vector dimensions beforehand.
    pub fn from_snapshot(
        config: HnswConfig,
        entry_point: Option<&str>,
        nodes: Vec<NodeSnapshot>,
    ) -> Self {
        let mut graph = HnswGraph::new(config);

        // First pass allocates every slot so the second can resolve ids
        for node in &nodes {
            let slot = graph.alloc(Node {
                id: node.id.clone(),
                vector: node.vector.clone(),
                level: node.level,
                neighbors: vec![Vec::new(); node.level + 1],
            });
            graph.slot_by_id.insert(node.id.clone(), slot);
        }

        for node in nodes {
            let Some(&slot) = graph.slot_by_id.get(&node.id) else {
                continue;
            };
            for (layer, ids) in node.connections {
                let resolved: Vec<usize> = ids
                    .iter()
                    .filter_map(|id| graph.slot_by_id.get(id).copied())
                    .collect();
                if let Some(target) = graph.node_mut(slot) {
                    if let Some(list) = target.neighbors.get_mut(layer as usize) {
                        *list = resolved;
                    }
                }
            }
        }

        graph.entry = entry_point.and_then(|id| graph.slot_by_id.get(id).copied());
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HnswConfig {
        HnswConfig::new(3).with_m(8)
    }

    fn create_test_graph() -> HnswGraph {
        HnswGraph::with_seed(test_config(), 42)
    }

    fn test_vectors() -> Vec<(&'static str, Vec<f32>)> {
        vec![
            ("v1", vec![1.0, 0.0, 0.0]),
            ("v2", vec![0.9, 0.1, 0.0]),
            ("v3", vec![0.8, 0.2, 0.0]),
            ("v4", vec![0.0, 1.0, 0.0]),
            ("v5", vec![0.0, 0.9, 0.1]),
            ("v6", vec![0.0, 0.0, 1.0]),
            ("v7", vec![0.5, 0.5, 0.0]),
            ("v8", vec![0.5, 0.0, 0.5]),
        ]
    }

    #[test]
    fn test_empty_graph() {
        let graph = create_test_graph();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
        assert!(graph.entry_point().is_none());
        assert!(graph.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_insert_single() {
        let mut graph = create_test_graph();
        graph.insert("v1", vec![1.0, 0.0, 0.0]).unwrap();

        assert_eq!(graph.len(), 1);
        assert!(graph.contains("v1"));
        assert_eq!(graph.entry_point(), Some("v1"));
        assert_eq!(graph.vector("v1"), Some([1.0, 0.0, 0.0].as_slice()));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut graph = create_test_graph();
        graph.insert("v1", vec![1.0, 0.0, 0.0]).unwrap();

        let err = graph.insert("v2", vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                found: 2
            }
        ));
        assert!(!graph.contains("v2"));

        let err = graph.search(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_search_nearest_first() {
        let mut graph = create_test_graph();
        for (id, vector) in test_vectors() {
            graph.insert(id, vector).unwrap();
        }

        let results = graph.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "v1");
        assert!(results[0].1 < 0.01);
        // Ascending distances
        assert!(results[0].1 <= results[1].1);
        assert!(results[1].1 <= results[2].1);
    }

    #[test]
    fn test_search_respects_k() {
        let mut graph = create_test_graph();
        for (id, vector) in test_vectors() {
            graph.insert(id, vector).unwrap();
        }
        assert_eq!(graph.search(&[1.0, 0.0, 0.0], 2).unwrap().len(), 2);
        assert_eq!(graph.search(&[1.0, 0.0, 0.0], 100).unwrap().len(), 8);
    }

    #[test]
    fn test_upsert_replaces_vector() {
        let mut graph = create_test_graph();
        graph.insert("a", vec![1.0, 0.0, 0.0]).unwrap();
        graph.insert("a", vec![0.0, 1.0, 0.0]).unwrap();

        assert_eq!(graph.len(), 1);
        assert_eq!(graph.vector("a"), Some([0.0, 1.0, 0.0].as_slice()));

        let results = graph.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, "a");
        assert!(results[0].1 < 0.01);
    }

    #[test]
    fn test_remove() {
        let mut graph = create_test_graph();
        graph.insert("v1", vec![1.0, 0.0, 0.0]).unwrap();
        graph.insert("v2", vec![0.0, 1.0, 0.0]).unwrap();

        assert!(graph.remove("v1"));
        assert!(!graph.remove("v1"));
        assert!(!graph.remove("missing"));

        assert_eq!(graph.len(), 1);
        assert!(!graph.contains("v1"));
        assert!(graph.contains("v2"));
    }

    #[test]
    fn test_remove_entry_point_reelects() {
        let mut graph = create_test_graph();
        for (id, vector) in test_vectors() {
            graph.insert(id, vector).unwrap();
        }

        let entry = graph.entry_point().unwrap().to_string();
        assert!(graph.remove(&entry));

        // The new entry point exists and searches still work
        let new_entry = graph.entry_point().unwrap().to_string();
        assert_ne!(new_entry, entry);
        assert!(graph.contains(&new_entry));

        let results = graph.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(id, _)| id != &entry));
    }

    #[test]
    fn test_reelection_tie_break_smallest_id() {
        // Explicit levels via snapshot: all nodes at level 0, so the
        // re-election must fall back to the id tie-break
        let nodes = vec![
            NodeSnapshot {
                id: "c".to_string(),
                vector: vec![0.0, 0.0, 1.0],
                level: 0,
                connections: BTreeMap::from([(0, vec!["a".to_string(), "b".to_string()])]),
            },
            NodeSnapshot {
                id: "a".to_string(),
                vector: vec![1.0, 0.0, 0.0],
                level: 0,
                connections: BTreeMap::from([(0, vec!["b".to_string(), "c".to_string()])]),
            },
            NodeSnapshot {
                id: "b".to_string(),
                vector: vec![0.0, 1.0, 0.0],
                level: 0,
                connections: BTreeMap::from([(0, vec!["a".to_string(), "c".to_string()])]),
            },
        ];
        let mut graph = HnswGraph::from_snapshot(test_config(), Some("c"), nodes);
        assert_eq!(graph.entry_point(), Some("c"));

        graph.remove("c");
        assert_eq!(graph.entry_point(), Some("a"));
    }

    #[test]
    fn test_exact_at_small_scale() {
        // With fewer vectors than ef_search the beam covers the whole
        // graph, so results must match brute-force ranking
        let mut graph = HnswGraph::with_seed(HnswConfig::new(3).with_m(8), 7);
        let vectors: Vec<(String, Vec<f32>)> = (0..40)
            .map(|i| {
                let angle = (i as f32) * std::f32::consts::PI / 60.0;
                (format!("v{i}"), vec![angle.cos(), angle.sin(), 0.0])
            })
            .collect();
        for (id, vector) in &vectors {
            graph.insert(id, vector.clone()).unwrap();
        }

        let query = vectors[0].1.clone();
        let results = graph.search(&query, 5).unwrap();

        let mut brute: Vec<(String, f32)> = vectors
            .iter()
            .map(|(id, v)| (id.clone(), SimilarityMetric::Cosine.distance(&query, v)))
            .collect();
        brute.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        brute.truncate(5);

        let result_ids: Vec<&String> = results.iter().map(|(id, _)| id).collect();
        let brute_ids: Vec<&String> = brute.iter().map(|(id, _)| id).collect();
        assert_eq!(result_ids, brute_ids);
    }

    #[test]
    fn test_neighbor_lists_capped_at_m() {
        let mut graph = HnswGraph::with_seed(HnswConfig::new(3).with_m(4), 11);
        for i in 0..40 {
            let angle = (i as f32) * std::f32::consts::PI / 60.0;
            graph
                .insert(&format!("v{i}"), vec![angle.cos(), angle.sin(), 0.0])
                .unwrap();
        }

        for (_, node) in graph.snapshot_nodes() {
            for (_, connections) in node.connections {
                assert!(connections.len() <= 4);
            }
        }
    }

    #[test]
    fn test_euclidean_metric() {
        let mut graph = HnswGraph::with_seed(
            HnswConfig::new(3)
                .with_m(8)
                .with_metric(SimilarityMetric::Euclidean),
            3,
        );
        graph.insert("v1", vec![1.0, 0.0, 0.0]).unwrap();
        graph.insert("v2", vec![0.9, 0.0, 0.0]).unwrap();

        let results = graph.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results[0].0, "v1");
        assert!((results[1].1 - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut graph = create_test_graph();
        for (id, vector) in test_vectors() {
            graph.insert(id, vector).unwrap();
        }

        let entry = graph.entry_point().map(String::from);
        let nodes: Vec<NodeSnapshot> = graph
            .snapshot_nodes()
            .into_iter()
            .map(|(_, node)| node)
            .collect();

        let restored = HnswGraph::from_snapshot(test_config(), entry.as_deref(), nodes);
        assert_eq!(restored.len(), graph.len());
        assert_eq!(restored.entry_point(), graph.entry_point());

        let results = restored.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results[0].0, "v1");
    }

    #[test]
    fn test_clear() {
        let mut graph = create_test_graph();
        for (id, vector) in test_vectors() {
            graph.insert(id, vector).unwrap();
        }
        graph.clear();

        assert!(graph.is_empty());
        assert!(graph.entry_point().is_none());
        assert!(graph.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_config_validate() {
        assert!(HnswConfig::new(4).validate().is_ok());
        assert!(HnswConfig::new(0).validate().is_err());
        assert!(HnswConfig::new(4).with_m(1).validate().is_err());
        assert!(HnswConfig::new(4).with_ef_search(0).validate().is_err());
    }

    #[test]
    fn test_slot_reuse_after_remove() {
        let mut graph = create_test_graph();
        for (id, vector) in test_vectors() {
            graph.insert(id, vector).unwrap();
        }
        graph.remove("v4");
        graph.remove("v5");
        graph.insert("v9", vec![0.1, 0.9, 0.0]).unwrap();

        assert_eq!(graph.len(), 7);
        let results = graph.search(&[0.1, 0.9, 0.0], 1).unwrap();
        assert_eq!(results[0].0, "v9");
    }
}
