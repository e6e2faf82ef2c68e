//! In-memory tier backend
//!
//! A capacity-bounded map with LRU eviction by `last_accessed` and TTL
//! expiry. Expired items are purged lazily on access and by a periodic
//! sweep; nothing is persisted.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use strata_core::query::{QueryFilter, SemanticQuery, UpdatePatch};
use strata_core::{
    BackendKind, Error, EventSink, HealthStatus, MemoryEvent, MemoryItem, PeriodicTask, Result,
    StorageBackend, StorageStats,
};

/// Configuration for the in-memory backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBackendConfig {
    /// Instance name, used in errors and events
    pub name: String,

    /// Capacity bound; LRU eviction keeps the map at or below this
    pub max_items: usize,

    /// Interval of the TTL sweep task; no sweep task when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<Duration>,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            max_items: 10_000,
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl MemoryBackendConfig {
    /// Create config for testing: small capacity, no sweep task
    pub fn for_testing() -> Self {
        Self {
            name: "memory-test".to_string(),
            max_items: 100,
            sweep_interval: None,
        }
    }

    /// Builder: set the instance name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: set the capacity bound
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Builder: set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }
}

#[derive(Default)]
struct MemoryState {
    items: HashMap<String, MemoryItem>,
    initialized: bool,
}

impl MemoryState {
    fn remove_expired(&mut self) -> usize {
        let now = Utc::now();
        let before = self.items.len();
        self.items.retain(|_, item| !item.is_expired(now));
        before - self.items.len()
    }

    /// Evict least-recently-accessed items until within capacity.
    /// Expired items go first so live items survive where possible.
    fn evict_to_capacity(&mut self, max_items: usize) -> usize {
        if self.items.len() <= max_items {
            return 0;
        }
        let mut evicted = self.remove_expired();
        if self.items.len() > max_items {
            let mut by_access: Vec<(String, chrono::DateTime<Utc>)> = self
                .items
                .values()
                .map(|i| (i.id.clone(), i.last_accessed))
                .collect();
            by_access.sort_by_key(|(_, ts)| *ts);
            let excess = self.items.len() - max_items;
            for (id, _) in by_access.into_iter().take(excess) {
                self.items.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Capacity-bounded in-memory backend, the fastest tier
pub struct MemoryBackend {
    config: MemoryBackendConfig,
    state: Arc<RwLock<MemoryState>>,
    events: Option<Arc<dyn EventSink>>,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl MemoryBackend {
    pub fn new(config: MemoryBackendConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MemoryState::default())),
            events: None,
            sweeper: Mutex::new(None),
        }
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
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.initialized {
                return Ok(());
            }
            state.initialized = true;
        }

        if let Some(interval) = self.config.sweep_interval {
            let state = self.state.clone();
            let name = self.config.name.clone();
            let task = PeriodicTask::spawn("ttl-sweep", interval, move || {
                let state = state.clone();
                let name = name.clone();
                async move {
                    let removed = state.write().await.remove_expired();
                    if removed > 0 {
                        debug!(backend = %name, removed, "ttl sweep purged expired items");
                    }
                }
            });
            *self.sweeper.lock().await = Some(task);
        }

        info!(backend = %self.config.name, max_items = self.config.max_items, "memory backend initialized");
        Ok(())
    }

    async fn store(&self, item: MemoryItem) -> Result<()> {
        self.ensure_initialized().await?;
        item.validate()?;

        let id = item.id.clone();
        let tier = item.tier;
        let evicted = {
            let mut state = self.state.write().await;
            state.items.insert(id.clone(), item);
            state.evict_to_capacity(self.config.max_items)
        };
        if evicted > 0 {
            debug!(backend = %self.config.name, evicted, "evicted items over capacity");
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

        let mut state = self.state.write().await;
        Ok(query.scan(&mut state.items))
    }

    async fn update(&self, id: &str, patch: UpdatePatch) -> Result<Option<MemoryItem>> {
        self.ensure_initialized().await?;

        let updated = {
            let mut state = self.state.write().await;
            match state.items.get_mut(id) {
                Some(item) => {
                    patch.apply_to(item);
                    item.validate()?;
                    Some(item.clone())
                }
                None => None,
            }
        };

        if updated.is_some() {
            self.emit(MemoryEvent::ItemUpdated {
                id: id.to_string(),
                backend: self.config.name.clone(),
            });
        }
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.ensure_initialized().await?;

        let removed = self.state.write().await.items.remove(id).is_some();
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

        self.state.write().await.items.clear();
        self.emit(MemoryEvent::StorageCleared {
            backend: self.config.name.clone(),
        });
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        // Nothing durable to write
        self.ensure_initialized().await
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        self.ensure_initialized().await?;

        let state = self.state.read().await;
        Ok(StorageStats::compute(state.items.values()))
    }

    async fn health_check(&self) -> HealthStatus {
        if !self.state.read().await.initialized {
            return HealthStatus::unhealthy("not initialized");
        }
        HealthStatus::healthy()
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.sweeper.lock().await.take() {
            task.stop().await;
        }
        self.state.write().await.initialized = false;
        info!(backend = %self.config.name, "memory backend closed");
        Ok(())
    }
}
