//! Stratamem storage backends
//!
//! Map-based tier backends behind the shared storage contract:
//!
//! - [`MemoryBackend`] - capacity-bounded in-memory map with LRU eviction
//!   and TTL expiry; the fastest tier, no persistence
//! - [`FileBackend`] - the same map with write buffering, JSON-snapshot
//!   persistence, backup rotation, and crash recovery

pub mod file;
pub mod memory;

pub use file::{FileBackend, FileBackendConfig};
pub use memory::{MemoryBackend, MemoryBackendConfig};
