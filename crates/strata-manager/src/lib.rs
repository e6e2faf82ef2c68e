//! Stratamem memory manager
//!
//! Binds memory tiers to storage backends and orchestrates the item
//! lifecycle across them:
//!
//! - importance scoring for new items
//! - capacity-driven migration down the tier chain
//! - hybrid (exact + semantic) search across all backends
//! - aggregate statistics and health reporting
//!
//! The manager only talks to backends through the storage contract in
//! `strata_core::backend`; it never reaches into their interior state.

pub mod config;
pub mod importance;
pub mod manager;

pub use config::{BackendDefinition, BackendOptions, HybridWeights, ManagerConfig};
pub use importance::score_importance;
pub use manager::{MemoryManager, SearchOptions, SearchResult, SearchStrategy, StoreOptions};
