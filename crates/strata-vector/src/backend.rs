//! Vector tier backend
//!
//! Pairs an HNSW graph over item embeddings with a metadata map holding
//! the full items, both behind one lock so readers never observe the
//! graph and the map out of step. Items without an embedding are stored
//! but not indexed; they remain reachable through `retrieve`/`query` and
//! are invisible to `semantic_query`. Snapshots persist graph and
//! metadata together in a single JSON file.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use strata_core::query::{QueryFilter, SemanticQuery, UpdatePatch};
use strata_core::similarity::{SimilarityMetric, similarity_from_distance};
use strata_core::{
    BackendKind, Error, EventSink, HealthStatus, MemoryEvent, MemoryItem, PeriodicTask, Result,
    StorageBackend, StorageStats,
};

use crate::embedder::Embedder;
use crate::hnsw::{HnswConfig, HnswGraph, NodeSnapshot};

const SNAPSHOT_VERSION: &str = "1.0";

/// Configuration for the vector backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorBackendConfig {
    /// Instance name, used in errors and events
    pub name: String,

    /// Embedding dimension accepted by this instance
    pub dimension: usize,

    /// Maximum graph connections per node per layer
    pub m: usize,

    /// Candidate breadth during construction
    pub ef_construction: usize,

    /// Candidate breadth during search
    pub ef_search: usize,

    /// Maximum graph layers
    pub max_level: usize,

    /// Distance metric
    pub metric: SimilarityMetric,

    /// Snapshot file; the backend is ephemeral when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_path: Option<PathBuf>,

    /// Interval of the scheduled snapshot save; manual flushes only
    /// when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_save_interval: Option<Duration>,
}

impl Default for VectorBackendConfig {
    fn default() -> Self {
        Self {
            name: "vector".to_string(),
            dimension: 384,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_level: 16,
            metric: SimilarityMetric::Cosine,
            persistence_path: None,
            auto_save_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl VectorBackendConfig {
    /// Create config for testing: small dimension, no persistence
    pub fn for_testing() -> Self {
        Self {
            name: "vector-test".to_string(),
            dimension: 4,
            m: 8,
            ef_construction: 100,
            ef_search: 50,
            max_level: 10,
            metric: SimilarityMetric::Cosine,
            persistence_path: None,
            auto_save_interval: None,
        }
    }

    /// Builder: set the instance name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: set the embedding dimension
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Builder: set the distance metric
    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Builder: set the snapshot path
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence_path = Some(path.into());
        self
    }

    /// Builder: set the scheduled save interval
    pub fn with_auto_save(mut self, interval: Duration) -> Self {
        self.auto_save_interval = Some(interval);
        self
    }

    fn hnsw_config(&self) -> HnswConfig {
        HnswConfig {
            dimension: self.dimension,
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            max_level: self.max_level,
            metric: self.metric,
        }
    }
}

/// Snapshot body persisted to the snapshot file
#[derive(Debug, Serialize, Deserialize)]
struct VectorSnapshot {
    version: String,
    timestamp: i64,
    config: SnapshotConfig,
    entry_point: Option<String>,
    nodes: Vec<(String, NodeSnapshot)>,
    metadata: Vec<(String, MemoryItem)>,
}

/// Graph parameters a snapshot must agree on with the loading instance
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotConfig {
    dimension: usize,
    m: usize,
    metric: SimilarityMetric,
}

struct VectorState {
    graph: HnswGraph,
    items: HashMap<String, MemoryItem>,
    initialized: bool,
}

/// HNSW-backed vector tier backend
pub struct VectorBackend {
    config: VectorBackendConfig,
    state: Arc<RwLock<VectorState>>,
    embedder: Option<Arc<dyn Embedder>>,
    events: Option<Arc<dyn EventSink>>,
    saver: Mutex<Option<PeriodicTask>>,
    /// Serializes snapshot writers so newer state never loses to an
    /// older write landing later
    save_lock: Arc<Mutex<()>>,
}

impl VectorBackend {
    pub fn new(config: VectorBackendConfig) -> Self {
        let graph = HnswGraph::new(config.hnsw_config());
        Self {
            config,
            state: Arc::new(RwLock::new(VectorState {
                graph,
                items: HashMap::new(),
                initialized: false,
            })),
            embedder: None,
            events: None,
            saver: Mutex::new(None),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Builder: attach an embedder used to re-embed items whose content
    /// changes through `update`
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Builder: attach an event sink
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    fn emit(&self, event: MemoryEvent) {
        if let Some(sink) = &self.events {
            sink.emit(event);
        }
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if !self.state.read().await.initialized {
            return Err(Error::NotInitialized(self.config.name.clone()));
        }
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                found: vector.len(),
            });
        }
        Ok(())
    }

    /// Load and validate the snapshot file. Missing file starts empty;
    /// an unreadable or mismatched snapshot is fatal.
    async fn load_snapshot(&self, path: &PathBuf) -> Result<(HnswGraph, HashMap<String, MemoryItem>)> {
        let bytes = match tokio::fs::read(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(backend = %self.config.name, "no snapshot found, starting empty");
                return Ok((HnswGraph::new(self.config.hnsw_config()), HashMap::new()));
            }
            Err(e) => return Err(e.into()),
            Ok(bytes) => bytes,
        };

        let snapshot: VectorSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| Error::SnapshotCorrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if snapshot.config.dimension != self.config.dimension {
            return Err(Error::SnapshotCorrupt {
                path: path.display().to_string(),
                reason: format!(
                    "dimension mismatch: snapshot {}, configured {}",
                    snapshot.config.dimension, self.config.dimension
                ),
            });
        }
        if snapshot.config.m != self.config.m {
            return Err(Error::SnapshotCorrupt {
                path: path.display().to_string(),
                reason: format!(
                    "graph parameter mismatch: snapshot m={}, configured m={}",
                    snapshot.config.m, self.config.m
                ),
            });
        }
        if snapshot.config.metric != self.config.metric {
            return Err(Error::SnapshotCorrupt {
                path: path.display().to_string(),
                reason: format!(
                    "metric mismatch: snapshot {}, configured {}",
                    snapshot.config.metric, self.config.metric
                ),
            });
        }
        if let Some(entry) = &snapshot.entry_point {
            if !snapshot.nodes.iter().any(|(id, _)| id == entry) {
                return Err(Error::SnapshotCorrupt {
                    path: path.display().to_string(),
                    reason: format!("entry point {entry} references a missing node"),
                });
            }
        }
        for (id, node) in &snapshot.nodes {
            if node.vector.len() != self.config.dimension {
                return Err(Error::SnapshotCorrupt {
                    path: path.display().to_string(),
                    reason: format!(
                        "node {id} has vector of length {}, expected {}",
                        node.vector.len(),
                        self.config.dimension
                    ),
                });
            }
        }

        let nodes: Vec<NodeSnapshot> = snapshot.nodes.into_iter().map(|(_, node)| node).collect();
        let graph = HnswGraph::from_snapshot(
            self.config.hnsw_config(),
            snapshot.entry_point.as_deref(),
            nodes,
        );
        let items: HashMap<String, MemoryItem> = snapshot.metadata.into_iter().collect();

        debug!(
            backend = %self.config.name,
            nodes = graph.len(),
            items = items.len(),
            "snapshot loaded"
        );
        Ok((graph, items))
    }
}

/// Persist graph and metadata to the snapshot file.
///
/// Writers queue on `save_lock`, held from snapshot assembly through the
/// rename, so snapshots land on disk in state order. The state lock
/// itself is released before any file I/O.
async fn save_to_disk(
    state: &RwLock<VectorState>,
    save_lock: &Mutex<()>,
    config: &VectorBackendConfig,
    events: Option<&Arc<dyn EventSink>>,
) -> Result<usize> {
    let Some(path) = &config.persistence_path else {
        return Ok(0);
    };
    let _guard = save_lock.lock().await;

    let (snapshot, count) = {
        let state = state.read().await;
        if !state.initialized {
            return Err(Error::NotInitialized(config.name.clone()));
        }
        let mut metadata: Vec<(String, MemoryItem)> = state
            .items
            .iter()
            .map(|(id, item)| (id.clone(), item.clone()))
            .collect();
        metadata.sort_by(|a, b| a.0.cmp(&b.0));
        let count = metadata.len();
        let snapshot = VectorSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            config: SnapshotConfig {
                dimension: config.dimension,
                m: config.m,
                metric: config.metric,
            },
            entry_point: state.graph.entry_point().map(String::from),
            nodes: state.graph.snapshot_nodes(),
            metadata,
        };
        (snapshot, count)
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(&snapshot)?;
    let staged = path.with_extension("tmp");
    tokio::fs::write(&staged, json).await?;
    tokio::fs::rename(&staged, path).await?;
    debug!(backend = %config.name, items = count, "vector snapshot written");

    if let Some(sink) = events {
        sink.emit(MemoryEvent::StorageFlushed {
            backend: config.name.clone(),
            items: count,
        });
    }
    Ok(count)
}

#[async_trait]
impl StorageBackend for VectorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn initialize(&self) -> Result<()> {
        if self.state.read().await.initialized {
            return Ok(());
        }
        self.config.hnsw_config().validate()?;

        let loaded = match &self.config.persistence_path {
            Some(path) => Some(self.load_snapshot(path).await?),
            None => None,
        };

        {
            let mut state = self.state.write().await;
            if state.initialized {
                return Ok(());
            }
            if let Some((graph, items)) = loaded {
                state.graph = graph;
                state.items = items;
            }
            state.initialized = true;
        }

        if self.config.persistence_path.is_some() {
            if let Some(interval) = self.config.auto_save_interval {
                let state = self.state.clone();
                let save_lock = self.save_lock.clone();
                let config = self.config.clone();
                let events = self.events.clone();
                let task = PeriodicTask::spawn("vector-save", interval, move || {
                    let state = state.clone();
                    let save_lock = save_lock.clone();
                    let config = config.clone();
                    let events = events.clone();
                    async move {
                        // Retried on the next tick
                        if let Err(e) =
                            save_to_disk(&state, &save_lock, &config, events.as_ref()).await
                        {
                            warn!(backend = %config.name, error = %e, "scheduled save failed");
                        }
                    }
                });
                *self.saver.lock().await = Some(task);
            }
        }

        info!(
            backend = %self.config.name,
            dimension = self.config.dimension,
            m = self.config.m,
            metric = %self.config.metric,
            "vector backend initialized"
        );
        Ok(())
    }

    async fn store(&self, item: MemoryItem) -> Result<()> {
        self.ensure_initialized().await?;
        item.validate()?;
        if let Some(embedding) = &item.embedding {
            self.check_dimension(embedding)?;
        }

        let id = item.id.clone();
        let tier = item.tier;
        {
            let mut state = self.state.write().await;
            match &item.embedding {
                Some(embedding) => state.graph.insert(&id, embedding.clone())?,
                // An upsert that drops the embedding also leaves the graph
                None => {
                    state.graph.remove(&id);
                }
            }
            state.items.insert(id.clone(), item);
        }

        self.emit(MemoryEvent::ItemStored {
            id,
            tier,
            backend: self.config.name.clone(),
        });
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>> {
        self.ensure_initialized().await?;

        let mut state = self.state.write().await;
        let expired = match state.items.get(id) {
            Some(item) => item.is_expired(Utc::now()),
            None => return Ok(None),
        };
        if expired {
            state.items.remove(id);
            state.graph.remove(id);
            return Ok(None);
        }
        Ok(state.items.get_mut(id).map(|item| {
            item.touch();
            item.clone()
        }))
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<MemoryItem>> {
        self.ensure_initialized().await?;

        let state = self.state.read().await;
        let now = Utc::now();
        let live = state
            .items
            .values()
            .filter(|i| !i.is_expired(now))
            .cloned();
        Ok(filter.apply(live))
    }

    async fn semantic_query(&self, query: &SemanticQuery) -> Result<Vec<(MemoryItem, f64)>> {
        self.ensure_initialized().await?;
        self.check_dimension(&query.embedding)?;

        let mut state = self.state.write().await;

        // Over-fetch so exact filtering and the threshold still leave
        // enough candidates
        let found = state.graph.search(&query.embedding, query.limit * 2)?;

        let now = Utc::now();
        let mut ranked: Vec<(String, f64)> = Vec::new();
        for (id, distance) in found {
            let Some(item) = state.items.get(&id) else {
                continue;
            };
            if item.is_expired(now) || !query.filter.matches(item) {
                continue;
            }
            let similarity = similarity_from_distance(distance);
            if similarity < query.similarity_threshold {
                continue;
            }
            ranked.push((id, similarity));
        }
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(query.limit);

        let mut results = Vec::with_capacity(ranked.len());
        for (id, similarity) in ranked {
            if let Some(item) = state.items.get_mut(&id) {
                item.touch();
                results.push((item.clone(), similarity));
            }
        }
        Ok(results)
    }

    async fn update(&self, id: &str, patch: UpdatePatch) -> Result<Option<MemoryItem>> {
        self.ensure_initialized().await?;
        if let Some(embedding) = &patch.embedding {
            self.check_dimension(embedding)?;
        }

        let (mut updated, needs_embedding) = {
            let mut state = self.state.write().await;
            let Some(item) = state.items.get_mut(id) else {
                return Ok(None);
            };

            let mut updated = item.clone();
            let reindex = patch.apply_to(&mut updated);
            updated.validate()?;
            *item = updated.clone();

            if reindex {
                if let Some(embedding) = updated.embedding.clone() {
                    state.graph.insert(id, embedding)?;
                }
            }

            // Content changed with no replacement embedding: re-embed
            // through the attached embedder when there is one
            let needs_embedding =
                reindex && patch.embedding.is_none() && self.embedder.is_some();
            (updated, needs_embedding)
        };

        if needs_embedding {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(&updated.content).await {
                    Ok(embedding) => {
                        let mut state = self.state.write().await;
                        // Item may have changed while the lock was
                        // released; only attach to the same content
                        if let Some(item) = state.items.get_mut(id) {
                            if item.content == updated.content {
                                item.embedding = Some(embedding.clone());
                                updated = item.clone();
                                if let Err(e) = state.graph.insert(id, embedding) {
                                    warn!(backend = %self.config.name, id, error = %e, "re-index failed");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            backend = %self.config.name,
                            id,
                            error = %e,
                            "re-embedding failed, keeping previous embedding"
                        );
                    }
                }
            }
        }

        self.emit(MemoryEvent::ItemUpdated {
            id: id.to_string(),
            backend: self.config.name.clone(),
        });
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.ensure_initialized().await?;

        let removed = {
            let mut state = self.state.write().await;
            state.graph.remove(id);
            state.items.remove(id).is_some()
        };
        if removed {
            self.emit(MemoryEvent::ItemDeleted {
                id: id.to_string(),
                backend: self.config.name.clone(),
            });
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_initialized().await?;

        {
            let mut state = self.state.write().await;
            state.graph.clear();
            state.items.clear();
        }

        if let Some(path) = &self.config.persistence_path {
            // Queue behind in-flight saves so their file writes finish
            // before the removal
            let _guard = self.save_lock.lock().await;
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.emit(MemoryEvent::StorageCleared {
            backend: self.config.name.clone(),
        });
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_initialized().await?;
        save_to_disk(&self.state, &self.save_lock, &self.config, self.events.as_ref()).await?;
        Ok(())
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        self.ensure_initialized().await?;

        let state = self.state.read().await;
        Ok(StorageStats::compute(state.items.values()))
    }

    async fn health_check(&self) -> HealthStatus {
        let state = self.state.read().await;
        if !state.initialized {
            return HealthStatus::unhealthy("not initialized");
        }

        if !state.graph.is_empty() && state.graph.entry_point().is_none() {
            return HealthStatus::unhealthy("entry point references a missing node");
        }
        for (id, vector) in state.graph.iter_vectors() {
            if vector.len() != self.config.dimension {
                return HealthStatus::unhealthy(format!(
                    "node {id} has vector of length {}, expected {}",
                    vector.len(),
                    self.config.dimension
                ));
            }
        }
        HealthStatus::healthy()
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.saver.lock().await.take() {
            task.stop().await;
        }
        if self.state.read().await.initialized {
            if self.config.persistence_path.is_some() {
                save_to_disk(&self.state, &self.save_lock, &self.config, self.events.as_ref())
                    .await?;
            }
            self.state.write().await.initialized = false;
        }
        info!(backend = %self.config.name, "vector backend closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use strata_core::MemoryItemType;
    use strata_core::similarity::normalize;
    use tempfile::TempDir;

    async fn create_test_backend() -> VectorBackend {
        let backend = VectorBackend::new(VectorBackendConfig::for_testing());
        backend.initialize().await.unwrap();
        backend
    }

    fn item(id: &str, content: &str, embedding: Vec<f32>) -> MemoryItem {
        MemoryItem::new(content, MemoryItemType::Fact)
            .with_id(id)
            .with_embedding(embedding)
    }

    fn unit_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let mut v: Vec<f32> = (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect();
                normalize(&mut v);
                v
            })
            .collect()
    }

    #[tokio::test]
    async fn test_requires_initialization() {
        let backend = VectorBackend::new(VectorBackendConfig::for_testing());
        let err = backend
            .store(item("a", "x", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let backend = create_test_backend().await;

        backend
            .store(item("a", "hello", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();

        let got = backend.retrieve("a").await.unwrap().unwrap();
        assert_eq!(got.content, "hello");
        assert_eq!(got.access_count, 1);
        assert!(got.embedding.is_some());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected_without_partial_write() {
        let backend = create_test_backend().await;

        let err = backend
            .store(item("a", "bad", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert!(backend.retrieve("a").await.unwrap().is_none());
        assert_eq!(backend.get_stats().await.unwrap().total_items, 0);
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let backend = create_test_backend().await;
        let err = backend
            .semantic_query(&SemanticQuery::new(vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_semantic_query_finds_inserted_vector_first() {
        let backend = create_test_backend().await;
        let vectors = unit_vectors(50, 7);

        for (i, vector) in vectors.iter().enumerate() {
            backend
                .store(item(&format!("item-{i}"), &format!("content {i}"), vector.clone()))
                .await
                .unwrap();
        }

        let results = backend
            .semantic_query(&SemanticQuery::new(vectors[17].clone()).with_limit(5))
            .await
            .unwrap();

        assert_eq!(results[0].0.id, "item-17");
        assert!((results[0].1 - 1.0).abs() < 1e-3);
        assert_eq!(results[0].0.access_count, 1);
    }

    #[tokio::test]
    async fn test_semantic_query_threshold() {
        let backend = create_test_backend().await;
        backend
            .store(item("near", "x", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        backend
            .store(item("far", "y", vec![0.0, 1.0, 0.0, 0.0]))
            .await
            .unwrap();

        let results = backend
            .semantic_query(
                &SemanticQuery::new(vec![1.0, 0.0, 0.0, 0.0]).with_threshold(0.5),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "near");
        assert!(results.iter().all(|(_, sim)| *sim >= 0.5));
    }

    #[tokio::test]
    async fn test_semantic_query_applies_filter() {
        let backend = create_test_backend().await;
        backend
            .store(item("err", "disk failure", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        backend
            .store(
                MemoryItem::new("disk failure", MemoryItemType::Error)
                    .with_id("real-err")
                    .with_embedding(vec![0.99, 0.01, 0.0, 0.0]),
            )
            .await
            .unwrap();

        let query = SemanticQuery::new(vec![1.0, 0.0, 0.0, 0.0])
            .with_filter(QueryFilter::new().with_type(MemoryItemType::Error));
        let results = backend.semantic_query(&query).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "real-err");
    }

    #[tokio::test]
    async fn test_unembedded_items_stored_not_indexed() {
        let backend = create_test_backend().await;
        backend
            .store(MemoryItem::new("no vector here", MemoryItemType::Fact).with_id("plain"))
            .await
            .unwrap();
        backend
            .store(item("vec", "has vector", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();

        assert!(backend.retrieve("plain").await.unwrap().is_some());
        assert_eq!(backend.query(&QueryFilter::new()).await.unwrap().len(), 2);

        let results = backend
            .semantic_query(&SemanticQuery::new(vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "vec");
    }

    #[tokio::test]
    async fn test_update_with_embedder_reindexes() {
        let backend = VectorBackend::new(VectorBackendConfig::for_testing())
            .with_embedder(Arc::new(HashEmbedder::new(4)));
        backend.initialize().await.unwrap();

        let embedder = HashEmbedder::new(4);
        let old = embedder.embed("old content").await.unwrap();
        backend.store(item("a", "old content", old.clone())).await.unwrap();

        let updated = backend
            .update("a", UpdatePatch::new().content("completely new words"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.content, "completely new words");
        assert_ne!(updated.embedding.as_ref(), Some(&old));

        // The new embedding is searchable
        let query = embedder.embed("completely new words").await.unwrap();
        let results = backend.semantic_query(&SemanticQuery::new(query)).await.unwrap();
        assert_eq!(results[0].0.id, "a");
        assert!((results[0].1 - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_update_explicit_embedding() {
        let backend = create_test_backend().await;
        backend
            .store(item("a", "text", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();

        backend
            .update(
                "a",
                UpdatePatch::new().embedding(vec![0.0, 1.0, 0.0, 0.0]),
            )
            .await
            .unwrap()
            .unwrap();

        let results = backend
            .semantic_query(&SemanticQuery::new(vec![0.0, 1.0, 0.0, 0.0]).with_limit(1))
            .await
            .unwrap();
        assert_eq!(results[0].0.id, "a");
        assert!((results[0].1 - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let backend = create_test_backend().await;
        let result = backend
            .update("ghost", UpdatePatch::new().content("x"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_from_graph_and_search_survives() {
        let backend = create_test_backend().await;
        let vectors = unit_vectors(10, 3);
        for (i, vector) in vectors.iter().enumerate() {
            backend
                .store(item(&format!("item-{i}"), "c", vector.clone()))
                .await
                .unwrap();
        }

        for i in 0..5 {
            assert!(backend.delete(&format!("item-{i}")).await.unwrap());
        }
        assert!(!backend.delete("item-0").await.unwrap());

        let results = backend
            .semantic_query(&SemanticQuery::new(vectors[7].clone()).with_limit(10))
            .await
            .unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].0.id, "item-7");
        assert!(results.iter().all(|(item, _)| {
            item.id.trim_start_matches("item-").parse::<usize>().unwrap() >= 5
        }));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector.json");
        let config = VectorBackendConfig::for_testing().with_persistence(&path);

        let backend = VectorBackend::new(config.clone());
        backend.initialize().await.unwrap();
        let vectors = unit_vectors(12, 9);
        for (i, vector) in vectors.iter().enumerate() {
            backend
                .store(item(&format!("item-{i}"), &format!("content {i}"), vector.clone()))
                .await
                .unwrap();
        }
        backend.close().await.unwrap();
        assert!(path.exists());

        let reopened = VectorBackend::new(config);
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.get_stats().await.unwrap().total_items, 12);

        let results = reopened
            .semantic_query(&SemanticQuery::new(vectors[4].clone()).with_limit(3))
            .await
            .unwrap();
        assert_eq!(results[0].0.id, "item-4");
        assert!((results[0].1 - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_snapshot_wire_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector.json");
        let backend =
            VectorBackend::new(VectorBackendConfig::for_testing().with_persistence(&path));
        backend.initialize().await.unwrap();

        backend
            .store(item("a", "hello", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        backend.flush().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["version"], "1.0");
        assert!(value["timestamp"].is_i64());
        assert_eq!(value["config"]["dimension"], 4);
        assert_eq!(value["config"]["m"], 8);
        assert_eq!(value["config"]["metric"], "cosine");
        assert_eq!(value["entry_point"], "a");
        // Node and metadata entries are [id, body] pairs
        assert_eq!(value["nodes"][0][0], "a");
        assert_eq!(value["nodes"][0][1]["vector"][0], 1.0);
        assert_eq!(value["metadata"][0][0], "a");
        assert_eq!(value["metadata"][0][1]["content"], "hello");
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_fails_initialize() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let backend =
            VectorBackend::new(VectorBackendConfig::for_testing().with_persistence(&path));
        let err = backend.initialize().await.unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn test_snapshot_config_mismatch_fails_initialize() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector.json");

        let writer =
            VectorBackend::new(VectorBackendConfig::for_testing().with_persistence(&path));
        writer.initialize().await.unwrap();
        writer
            .store(item("a", "x", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        writer.close().await.unwrap();

        let reader = VectorBackend::new(
            VectorBackendConfig::for_testing()
                .with_dimension(8)
                .with_persistence(&path),
        );
        let err = reader.initialize().await.unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn test_scheduled_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector.json");
        let config = VectorBackendConfig::for_testing()
            .with_persistence(&path)
            .with_auto_save(Duration::from_millis(20));

        let backend = VectorBackend::new(config);
        backend.initialize().await.unwrap();
        backend
            .store(item("a", "x", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(path.exists());
        backend.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_land_newest_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector.json");
        let backend = Arc::new(VectorBackend::new(
            VectorBackendConfig::for_testing().with_persistence(&path),
        ));
        backend.initialize().await.unwrap();

        let vectors = unit_vectors(40, 21);
        let mut tasks = Vec::new();
        for writer in 0..4 {
            let backend = backend.clone();
            let vectors = vectors.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    let index = writer * 10 + i;
                    backend
                        .store(item(&format!("item-{index}"), "payload", vectors[index].clone()))
                        .await
                        .unwrap();
                }
                backend.flush().await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Whichever save wrote last queued behind the others, so its
        // snapshot saw every completed store
        let bytes = std::fs::read(&path).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["metadata"].as_array().unwrap().len(), 40);
        assert!(!dir.path().join("vector.tmp").exists());
    }

    #[tokio::test]
    async fn test_clear_removes_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector.json");
        let backend =
            VectorBackend::new(VectorBackendConfig::for_testing().with_persistence(&path));
        backend.initialize().await.unwrap();

        backend
            .store(item("a", "x", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        backend.flush().await.unwrap();
        assert!(path.exists());

        backend.clear().await.unwrap();
        assert!(!path.exists());
        assert_eq!(backend.get_stats().await.unwrap().total_items, 0);
        assert!(
            backend
                .semantic_query(&SemanticQuery::new(vec![1.0, 0.0, 0.0, 0.0]))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let backend = VectorBackend::new(VectorBackendConfig::for_testing());
        assert!(!backend.health_check().await.healthy);

        backend.initialize().await.unwrap();
        backend
            .store(item("a", "x", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        let status = backend.health_check().await;
        assert!(status.healthy);
        assert!(!status.is_degraded());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_initialize() {
        let mut config = VectorBackendConfig::for_testing();
        config.dimension = 0;
        let backend = VectorBackend::new(config);
        let err = backend.initialize().await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_stats() {
        let backend = create_test_backend().await;
        backend
            .store(item("a", "x", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap();
        backend
            .store(MemoryItem::new("plain", MemoryItemType::Context).with_id("b"))
            .await
            .unwrap();

        let stats = backend.get_stats().await.unwrap();
        assert_eq!(stats.total_items, 2);
        assert_eq!(
            stats.items_by_type.get(&MemoryItemType::Context),
            Some(&1)
        );
    }
}
