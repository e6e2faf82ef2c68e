//! The storage backend contract shared by every tier
//!
//! All tiers sit behind one trait so the manager can bind tiers to
//! backends and fan operations out without runtime type tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::item::MemoryItem;
use crate::query::{BatchEntry, BatchResult, QueryFilter, SemanticQuery, UpdatePatch};
use crate::stats::{HealthStatus, StorageStats};

/// Closed set of backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Capacity-bounded in-memory map, no persistence
    Memory,
    /// JSON-snapshot persistence with backup rotation
    File,
    /// HNSW graph plus metadata map
    Vector,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Vector => "vector",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for tier storage backends
///
/// Lifecycle: `initialize()` (idempotent) before any operation, then
/// `close()` to flush and release. Every operation on an uninitialized
/// or closed backend fails with `Error::NotInitialized`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which implementation this is
    fn kind(&self) -> BackendKind;

    /// Configured instance name, used in errors and events
    fn name(&self) -> &str;

    /// Allocate resources, load persisted state, start background tasks
    async fn initialize(&self) -> Result<()>;

    /// Upsert one item by id. A single item is never partially applied.
    async fn store(&self, item: MemoryItem) -> Result<()>;

    /// Upsert many items, reporting per-item outcomes
    async fn store_batch(&self, items: Vec<MemoryItem>) -> Result<BatchResult> {
        let start = std::time::Instant::now();
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id.clone();
            match self.store(item).await {
                Ok(()) => entries.push(BatchEntry::ok(id)),
                Err(e) => entries.push(BatchEntry::failed(id, e.to_string())),
            }
        }
        Ok(BatchResult::new(entries, start.elapsed()))
    }

    /// Fetch a copy of an item, bumping its access stats. The returned
    /// copy reflects the advanced `access_count`/`last_accessed`.
    async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>>;

    /// Fetch many items; missing ids are skipped
    async fn retrieve_batch(&self, ids: &[String]) -> Result<Vec<MemoryItem>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.retrieve(id).await? {
                found.push(item);
            }
        }
        Ok(found)
    }

    /// Filtered, sorted, paginated read. Pure: no access stats change.
    async fn query(&self, filter: &QueryFilter) -> Result<Vec<MemoryItem>>;

    /// Similarity search fused with exact filtering. Returns items with
    /// their similarity scores, descending; results under the query's
    /// threshold are excluded. Bumps access stats on returned items.
    async fn semantic_query(&self, query: &SemanticQuery) -> Result<Vec<(MemoryItem, f64)>>;

    /// Merge a patch into an existing item, re-indexing when content or
    /// embedding changed. `Ok(None)` when the id is absent.
    async fn update(&self, id: &str, patch: UpdatePatch) -> Result<Option<MemoryItem>>;

    /// Remove one item. Returns false (not an error) for an absent id.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove many items, reporting per-item outcomes
    async fn delete_batch(&self, ids: &[String]) -> Result<BatchResult> {
        let start = std::time::Instant::now();
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.delete(id).await {
                Ok(_) => entries.push(BatchEntry::ok(id.clone())),
                Err(e) => entries.push(BatchEntry::failed(id.clone(), e.to_string())),
            }
        }
        Ok(BatchResult::new(entries, start.elapsed()))
    }

    /// Remove every item matching the filter, returning the count
    async fn delete_by_query(&self, filter: &QueryFilter) -> Result<usize> {
        let matched = self.query(filter).await?;
        let mut deleted = 0;
        for item in matched {
            if self.delete(&item.id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Remove all items and any on-disk representation
    async fn clear(&self) -> Result<()>;

    /// Force persistence of buffered state; trivial success for
    /// non-durable backends
    async fn flush(&self) -> Result<()>;

    /// Recompute storage statistics
    async fn get_stats(&self) -> Result<StorageStats>;

    /// Probe backend health; never returns an error
    async fn health_check(&self) -> HealthStatus;

    /// Stop background tasks, flush, and release resources
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_serialized_form() {
        assert_eq!(
            serde_json::to_string(&BackendKind::Vector).unwrap(),
            "\"vector\""
        );
        let kind: BackendKind = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(kind, BackendKind::Memory);
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::File.to_string(), "file");
    }
}
