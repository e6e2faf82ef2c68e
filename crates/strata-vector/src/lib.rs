//! Vector storage for stratamem
//!
//! Provides the HNSW-backed vector backend: an approximate
//! nearest-neighbor graph over item embeddings with a parallel metadata
//! map, plus pluggable embedding providers.

pub mod backend;
pub mod embedder;
pub mod hnsw;

pub use backend::{VectorBackend, VectorBackendConfig};
#[cfg(feature = "openai")]
pub use embedder::OpenAiEmbedder;
pub use embedder::{Embedder, EmbedderConfig, EmbedderKind, HashEmbedder, create_embedder};
pub use hnsw::{HnswConfig, HnswGraph, NodeSnapshot};
