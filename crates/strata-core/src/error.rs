//! Error types for stratamem
//!
//! Provides the error hierarchy shared by every storage backend and the
//! memory manager.

use thiserror::Error;

/// The main error type for stratamem operations
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lifecycle Errors ==========
    #[error("Backend not initialized: {0}")]
    NotInitialized(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    // ========== Validation Errors ==========
    #[error("Vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Importance out of range: {0} (must be within 0.0..=1.0)")]
    InvalidImportance(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========== Persistence Errors ==========
    #[error("Snapshot corrupt at {path}: {reason}")]
    SnapshotCorrupt { path: String, reason: String },

    #[error("Backup failed: {0}")]
    BackupFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========== Manager Errors ==========
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),
}

/// Result type alias for stratamem operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if the operation may be retried or degraded past
    /// this error (scheduled flushes retry on the next tick, stores
    /// proceed without an embedding).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::BackupFailed(_) | Error::EmbeddingFailed(_))
    }

    /// Returns true if this error indicates corrupt persisted state
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::SnapshotCorrupt { .. })
    }
}
