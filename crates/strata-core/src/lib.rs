//! Stratamem Core Library
//!
//! This crate provides the fundamental types, traits, and error handling
//! for the stratamem tiered memory engine.
//!
//! # Overview
//!
//! Stratamem persists agent memory items across capacity-bounded tiers
//! (working, short-term, long-term, archival) behind a single storage
//! contract, with exact and vector-similarity retrieval.
//!
//! # Modules
//!
//! - `item` - Memory items, tiers, and item types
//! - `query` - Filters, sorting, patches, and batch manifests
//! - `backend` - The storage backend contract shared by all tiers
//! - `similarity` - Vector distance and similarity math
//! - `stats` - Storage statistics and health reporting
//! - `events` - Lifecycle event sinks
//! - `task` - Background task plumbing for timer-driven maintenance
//! - `error` - Error types and result aliases

pub mod backend;
pub mod error;
pub mod events;
pub mod item;
pub mod query;
pub mod similarity;
pub mod stats;
pub mod task;

pub use backend::{BackendKind, StorageBackend};
pub use error::{Error, Result};
pub use events::{EventSink, MemoryEvent, RecordingSink, TracingSink};
pub use item::{MemoryItem, MemoryItemType, MemoryTier};
pub use query::{
    BatchEntry, BatchResult, QueryFilter, SemanticQuery, SortField, SortOrder, TimeRange,
    UpdatePatch,
};
pub use similarity::SimilarityMetric;
pub use stats::{HealthStatus, StorageStats};
pub use task::PeriodicTask;
