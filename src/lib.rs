//! Stratamem - Tiered memory engine for AI agents
//!
//! This is the main library crate that re-exports all stratamem components.

pub use strata_core as core;
pub use strata_manager as manager;
pub use strata_storage as storage;
pub use strata_vector as vector;

// Re-export commonly used types
pub use strata_core::{
    Error, HealthStatus, MemoryItem, MemoryItemType, MemoryTier, QueryFilter, Result,
    SemanticQuery, SortField, SortOrder, StorageBackend, StorageStats, UpdatePatch,
};

pub use strata_manager::{
    ManagerConfig, MemoryManager, SearchOptions, SearchResult, SearchStrategy, StoreOptions,
};
pub use strata_storage::{FileBackend, FileBackendConfig, MemoryBackend, MemoryBackendConfig};
pub use strata_vector::{Embedder, HashEmbedder, VectorBackend, VectorBackendConfig};
