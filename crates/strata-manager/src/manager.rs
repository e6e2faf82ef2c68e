//! Unified memory manager
//!
//! One manager instance owns the configured backends and exposes the
//! multi-tier operations: scored stores, tier-walking retrieval,
//! capacity-driven migration down the tier chain, and hybrid search
//! fanned out across every backend. Backends are built from the config
//! at `initialize()` and addressed by instance name afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use strata_core::query::{QueryFilter, SemanticQuery, SortField, SortOrder, UpdatePatch};
use strata_core::{
    Error, EventSink, HealthStatus, MemoryEvent, MemoryItem, MemoryItemType, MemoryTier,
    PeriodicTask, Result, StorageBackend, StorageStats,
};
use strata_storage::{FileBackend, MemoryBackend};
use strata_vector::{Embedder, HashEmbedder, VectorBackend};

use crate::config::{BackendOptions, ManagerConfig};
use crate::importance::score_importance;

type BackendMap = HashMap<String, Arc<dyn StorageBackend>>;

/// Options for a manager store
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Explicit id; generated when absent
    pub id: Option<String>,

    /// Target tier; `ShortTerm` when absent
    pub tier: Option<MemoryTier>,

    /// Explicit backend name, overriding the tier mapping
    pub backend: Option<String>,

    /// Explicit importance, overriding the heuristic
    pub importance: Option<f64>,

    /// Time-to-live from creation
    pub ttl: Option<Duration>,

    /// Pre-computed embedding, skipping generation
    pub embedding: Option<Vec<f32>>,

    /// Tags stored in item metadata
    pub tags: Vec<String>,

    /// Additional metadata entries
    pub metadata: HashMap<String, serde_json::Value>,

    /// Mirror the write to every other enabled backend with a
    /// `<id>-sync-<backend>` id
    pub sync_all: bool,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn tier(mut self, tier: MemoryTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.backend = Some(name.into());
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn sync_all(mut self) -> Self {
        self.sync_all = true;
        self
    }
}

/// How a search splits between the exact and semantic halves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Filter and content substring matching only
    Exact,
    /// Vector similarity only
    Semantic,
    /// Both halves, deduplicated and fused
    #[default]
    Hybrid,
}

/// Options for a manager search
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub strategy: SearchStrategy,

    /// Exact conditions applied by both halves
    pub filter: QueryFilter,

    /// Semantic results under this similarity are excluded
    pub similarity_threshold: f64,

    /// Maximum result count after fusion
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Hybrid,
            filter: QueryFilter::new(),
            similarity_threshold: 0.0,
            limit: 10,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One ranked search hit
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub item: MemoryItem,

    /// Fused ranking score
    pub score: f64,

    /// Similarity reported by the semantic half, when it found this item
    pub semantic_score: Option<f64>,
}

/// Unified multi-tier memory manager
pub struct MemoryManager {
    config: ManagerConfig,
    backends: OnceLock<BackendMap>,
    embedder: Option<Arc<dyn Embedder>>,
    events: Option<Arc<dyn EventSink>>,
    migrator: Mutex<Option<PeriodicTask>>,
}

impl MemoryManager {
    pub fn new(config: ManagerConfig) -> Self {
        let embedder: Option<Arc<dyn Embedder>> = if config.enable_vectorization {
            Some(Arc::new(HashEmbedder::new(config.vector_dimension)))
        } else {
            None
        };
        Self {
            config,
            backends: OnceLock::new(),
            embedder,
            events: None,
            migrator: Mutex::new(None),
        }
    }

    /// Builder: replace the embedder used for stores and query embedding
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Builder: attach an event sink, shared with every backend
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Backend instance by name; `None` before `initialize()` or for
    /// unknown names
    pub fn backend(&self, name: &str) -> Option<Arc<dyn StorageBackend>> {
        self.backends.get().and_then(|map| map.get(name).cloned())
    }

    fn registry(&self) -> Result<&BackendMap> {
        self.backends
            .get()
            .ok_or_else(|| Error::NotInitialized("manager".to_string()))
    }

    /// Enabled backends in declaration order
    fn ordered_backends<'a>(
        &'a self,
        backends: &'a BackendMap,
    ) -> impl Iterator<Item = (&'a str, &'a Arc<dyn StorageBackend>)> {
        self.config
            .backends
            .iter()
            .filter(|definition| definition.enabled)
            .filter_map(move |definition| {
                backends
                    .get(definition.name())
                    .map(|backend| (definition.name(), backend))
            })
    }

    fn build_backends(&self) -> BackendMap {
        let mut map: BackendMap = HashMap::new();
        for definition in &self.config.backends {
            if !definition.enabled {
                debug!(backend = definition.name(), "skipping disabled backend");
                continue;
            }
            let backend: Arc<dyn StorageBackend> = match &definition.options {
                BackendOptions::Memory(config) => {
                    let mut backend = MemoryBackend::new(config.clone());
                    if let Some(sink) = &self.events {
                        backend = backend.with_event_sink(sink.clone());
                    }
                    Arc::new(backend)
                }
                BackendOptions::File(config) => {
                    let mut backend = FileBackend::new(config.clone());
                    if let Some(sink) = &self.events {
                        backend = backend.with_event_sink(sink.clone());
                    }
                    Arc::new(backend)
                }
                BackendOptions::Vector(config) => {
                    let mut backend = VectorBackend::new(config.clone());
                    if let Some(embedder) = &self.embedder {
                        backend = backend.with_embedder(embedder.clone());
                    }
                    if let Some(sink) = &self.events {
                        backend = backend.with_event_sink(sink.clone());
                    }
                    Arc::new(backend)
                }
            };
            map.insert(definition.name().to_string(), backend);
        }
        map
    }

    // ========== Lifecycle ==========

    /// Validate the configuration, build and initialize every enabled
    /// backend, and start the migration sweep when configured
    pub async fn initialize(&self) -> Result<()> {
        self.config.validate()?;

        let registry = self.backends.get_or_init(|| self.build_backends());
        for backend in registry.values() {
            backend.initialize().await?;
        }

        if let Some(interval) = self.config.auto_migration_interval {
            let mut guard = self.migrator.lock().await;
            if guard.is_none() {
                let backends = registry.clone();
                let config = self.config.clone();
                let events = self.events.clone();
                *guard = Some(PeriodicTask::spawn("auto-migration", interval, move || {
                    let backends = backends.clone();
                    let config = config.clone();
                    let events = events.clone();
                    async move {
                        for tier in MemoryTier::all() {
                            // Retried on the next tick
                            if let Err(e) =
                                check_and_migrate(&backends, &config, events.as_ref(), tier).await
                            {
                                warn!(tier = %tier, error = %e, "scheduled migration failed");
                            }
                        }
                    }
                }));
            }
        }

        info!(backends = registry.len(), "memory manager initialized");
        Ok(())
    }

    /// Stop the migration sweep and close every backend
    pub async fn close(&self) -> Result<()> {
        if let Some(task) = self.migrator.lock().await.take() {
            task.stop().await;
        }
        if let Some(backends) = self.backends.get() {
            for backend in backends.values() {
                backend.close().await?;
            }
        }
        info!("memory manager closed");
        Ok(())
    }

    // ========== Item Operations ==========

    /// Store new content as a memory item.
    ///
    /// Resolves the backend from the options, scores importance when no
    /// explicit value is given, embeds the content when vectorization is
    /// enabled, writes, mirrors if `sync_all`, and runs the migration
    /// check for the affected tier. Returns the stored item.
    pub async fn store(
        &self,
        content: impl Into<String>,
        item_type: MemoryItemType,
        options: StoreOptions,
    ) -> Result<MemoryItem> {
        let backends = self.registry()?;
        let StoreOptions {
            id,
            tier,
            backend,
            importance,
            ttl,
            embedding,
            tags,
            metadata,
            sync_all,
        } = options;

        let tier = tier.unwrap_or(MemoryTier::ShortTerm);
        let target = match &backend {
            Some(name) => backends
                .get(name)
                .ok_or_else(|| Error::UnknownBackend(name.clone()))?,
            None => tier_backend(backends, &self.config, tier)?,
        };

        let mut item = MemoryItem::new(content, item_type).with_tier(tier);
        if let Some(id) = id {
            item.id = id;
        }
        item.ttl = ttl;
        if !tags.is_empty() {
            item = item.with_tags(tags);
        }
        item.metadata.extend(metadata);
        item.embedding = embedding;
        item.importance =
            importance.unwrap_or_else(|| score_importance(&item.content, item_type));

        if item.embedding.is_none() && self.config.enable_vectorization {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(&item.content).await {
                    Ok(embedding) => item.embedding = Some(embedding),
                    Err(e) => {
                        warn!(id = %item.id, error = %e, "embedding failed, storing without vector");
                    }
                }
            }
        }

        target.store(item.clone()).await?;
        debug!(id = %item.id, tier = %tier, backend = target.name(), "item stored");

        if sync_all {
            let primary = target.name().to_string();
            for (name, other) in self.ordered_backends(backends) {
                if name == primary {
                    continue;
                }
                let mirror = item.clone().with_id(format!("{}-sync-{}", item.id, name));
                if let Err(e) = other.store(mirror).await {
                    warn!(backend = name, error = %e, "sync mirror failed");
                }
            }
        }

        if let Err(e) = check_and_migrate(backends, &self.config, self.events.as_ref(), tier).await
        {
            warn!(tier = %tier, error = %e, "migration check failed");
        }

        Ok(item)
    }

    /// Fetch an item by id, walking tiers in migration order and then
    /// any backends not bound to a tier
    pub async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>> {
        let backends = self.registry()?;

        let mut seen: HashSet<&str> = HashSet::new();
        for tier in MemoryTier::all() {
            let Some(name) = self.config.tier_mapping.get(&tier) else {
                continue;
            };
            if !seen.insert(name.as_str()) {
                continue;
            }
            if let Some(backend) = backends.get(name) {
                if let Some(item) = backend.retrieve(id).await? {
                    return Ok(Some(item));
                }
            }
        }
        for (name, backend) in self.ordered_backends(backends) {
            if seen.contains(name) {
                continue;
            }
            if let Some(item) = backend.retrieve(id).await? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// Apply a patch to an item wherever it lives; `Ok(None)` when no
    /// backend holds the id
    pub async fn update(&self, id: &str, patch: UpdatePatch) -> Result<Option<MemoryItem>> {
        let backends = self.registry()?;
        for (_, backend) in self.ordered_backends(backends) {
            if let Some(updated) = backend.update(id, patch.clone()).await? {
                return Ok(Some(updated));
            }
        }
        Ok(None)
    }

    /// Delete an item from every backend holding it
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let backends = self.registry()?;
        let mut removed = false;
        for (_, backend) in self.ordered_backends(backends) {
            removed |= backend.delete(id).await?;
        }
        Ok(removed)
    }

    // ========== Search ==========

    /// Hybrid search across every enabled backend.
    ///
    /// The semantic half embeds the query and fans `semantic_query` out;
    /// the exact half fans `query` out and keeps content substring
    /// matches. Results are deduplicated by id (first occurrence wins)
    /// and ranked by the fused score
    /// `semantic*w_sem + recency*w_rec + importance*w_imp`.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchResult>> {
        let backends = self.registry()?;

        let mut merged: Vec<(MemoryItem, Option<f64>)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if matches!(
            options.strategy,
            SearchStrategy::Semantic | SearchStrategy::Hybrid
        ) {
            match &self.embedder {
                None => {
                    if options.strategy == SearchStrategy::Semantic {
                        return Err(Error::EmbeddingFailed(
                            "no embedder configured".to_string(),
                        ));
                    }
                    debug!("no embedder configured, hybrid search degraded to exact");
                }
                Some(embedder) => match embedder.embed(query).await {
                    Err(e) => {
                        if options.strategy == SearchStrategy::Semantic {
                            return Err(e);
                        }
                        warn!(error = %e, "query embedding failed, hybrid search degraded to exact");
                    }
                    Ok(embedding) => {
                        let semantic = SemanticQuery::new(embedding)
                            .with_filter(options.filter.clone())
                            .with_text(query)
                            .with_threshold(options.similarity_threshold)
                            .with_limit(options.limit * 2);
                        for (_, backend) in self.ordered_backends(backends) {
                            for (item, similarity) in backend.semantic_query(&semantic).await? {
                                if seen.insert(item.id.clone()) {
                                    merged.push((item, Some(similarity)));
                                }
                            }
                        }
                    }
                },
            }
        }

        if matches!(
            options.strategy,
            SearchStrategy::Exact | SearchStrategy::Hybrid
        ) {
            let needle = query.to_lowercase();
            for (_, backend) in self.ordered_backends(backends) {
                for item in backend.query(&options.filter).await? {
                    if !needle.is_empty() && !item.content.to_lowercase().contains(&needle) {
                        continue;
                    }
                    if seen.insert(item.id.clone()) {
                        merged.push((item, None));
                    }
                }
            }
        }

        let now = Utc::now();
        let weights = self.config.hybrid_weights;
        let mut results: Vec<SearchResult> = merged
            .into_iter()
            .map(|(item, semantic_score)| {
                let score = semantic_score.unwrap_or(0.0) * weights.semantic
                    + recency_score(&item, now) * weights.recency
                    + item.importance * weights.importance;
                SearchResult {
                    item,
                    score,
                    semantic_score,
                }
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(options.limit);
        Ok(results)
    }

    // ========== Maintenance ==========

    /// Per-backend storage statistics, keyed by instance name
    pub async fn get_stats(&self) -> Result<HashMap<String, StorageStats>> {
        let backends = self.registry()?;
        let mut stats = HashMap::new();
        for (name, backend) in self.ordered_backends(backends) {
            stats.insert(name.to_string(), backend.get_stats().await?);
        }
        Ok(stats)
    }

    /// Per-backend health, keyed by instance name; empty before
    /// `initialize()`
    pub async fn health_check(&self) -> HashMap<String, HealthStatus> {
        let Some(backends) = self.backends.get() else {
            return HashMap::new();
        };
        let mut statuses = HashMap::new();
        for (name, backend) in backends {
            statuses.insert(name.clone(), backend.health_check().await);
        }
        statuses
    }

    /// Flush every backend
    pub async fn flush_all(&self) -> Result<()> {
        let backends = self.registry()?;
        let results =
            futures::future::join_all(backends.values().map(|backend| backend.flush())).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Clear every backend
    pub async fn clear_all(&self) -> Result<()> {
        let backends = self.registry()?;
        let results =
            futures::future::join_all(backends.values().map(|backend| backend.clear())).await;
        for result in results {
            result?;
        }
        Ok(())
    }
}

/// Resolve the backend bound to a tier
fn tier_backend<'a>(
    backends: &'a BackendMap,
    config: &ManagerConfig,
    tier: MemoryTier,
) -> Result<&'a Arc<dyn StorageBackend>> {
    let name = config
        .tier_mapping
        .get(&tier)
        .ok_or_else(|| Error::UnknownTier(tier.to_string()))?;
    backends
        .get(name)
        .ok_or_else(|| Error::UnknownBackend(name.clone()))
}

/// Recency component of the hybrid score, halved roughly every day
fn recency_score(item: &MemoryItem, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - item.last_accessed).num_milliseconds().max(0) as f64 / 3_600_000.0;
    (-age_hours / 24.0).exp()
}

/// Run the capacity check for one tier, migrating when the tier holds
/// more items than its threshold
async fn check_and_migrate(
    backends: &BackendMap,
    config: &ManagerConfig,
    events: Option<&Arc<dyn EventSink>>,
    tier: MemoryTier,
) -> Result<()> {
    let Some(threshold) = config.capacity(tier) else {
        return Ok(());
    };
    let backend = tier_backend(backends, config, tier)?;
    let stats = backend.get_stats().await?;
    let count = stats.items_by_tier.get(&tier).copied().unwrap_or(0);
    if count <= threshold {
        return Ok(());
    }
    debug!(tier = %tier, count, threshold, "tier over capacity");
    perform_migration(backends, config, events, tier).await
}

/// Move the lowest-importance fifth of a tier down the chain, or evict
/// at the terminal tier
async fn perform_migration(
    backends: &BackendMap,
    config: &ManagerConfig,
    events: Option<&Arc<dyn EventSink>>,
    tier: MemoryTier,
) -> Result<()> {
    let backend = tier_backend(backends, config, tier)?;
    let candidates = backend
        .query(
            &QueryFilter::new()
                .with_tier(tier)
                .sorted_by(SortField::Importance, SortOrder::Asc),
        )
        .await?;
    if candidates.is_empty() {
        return Ok(());
    }

    let take = ((candidates.len() as f64) * 0.2).ceil() as usize;
    let candidates = &candidates[..take.min(candidates.len())];

    match tier.next() {
        Some(target) => {
            let mut migrated = 0;
            for item in candidates {
                migrate_to_tier(backends, config, item.clone(), target).await?;
                migrated += 1;
            }
            info!(from = %tier, to = %target, migrated, "migration completed");
            if let Some(sink) = events {
                sink.emit(MemoryEvent::MigrationCompleted {
                    from: tier,
                    to: Some(target),
                    migrated,
                    evicted: 0,
                });
            }
        }
        None => {
            let mut evicted = 0;
            for item in candidates {
                if item.importance < 0.3 && backend.delete(&item.id).await? {
                    evicted += 1;
                }
            }
            info!(tier = %tier, evicted, "terminal tier eviction completed");
            if let Some(sink) = events {
                sink.emit(MemoryEvent::MigrationCompleted {
                    from: tier,
                    to: None,
                    migrated: 0,
                    evicted,
                });
            }
        }
    }
    Ok(())
}

/// Store at the target tier, then delete from the source. Not atomic: a
/// crash between the two steps leaves the item in both tiers.
async fn migrate_to_tier(
    backends: &BackendMap,
    config: &ManagerConfig,
    mut item: MemoryItem,
    target: MemoryTier,
) -> Result<()> {
    let source = tier_backend(backends, config, item.tier)?;
    let destination = tier_backend(backends, config, target)?;
    let same_instance = source.name() == destination.name();

    item.tier = target;
    item.last_accessed = Utc::now();
    destination.store(item.clone()).await?;
    // When one instance serves both tiers the store above already
    // rewrote the record in place
    if !same_instance {
        source.delete(&item.id).await?;
    }
    debug!(id = %item.id, to = %target, "item migrated");
    Ok(())
}
