//! Manager configuration
//!
//! Declares which backends exist, which backend serves each tier, the
//! per-tier capacity thresholds that trigger migration, and the weights
//! of the hybrid search ranking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use strata_core::{BackendKind, Error, MemoryTier, Result};
use strata_storage::{FileBackendConfig, MemoryBackendConfig};
use strata_vector::VectorBackendConfig;

/// Backend-specific configuration, tagged by implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "options", rename_all = "snake_case")]
pub enum BackendOptions {
    Memory(MemoryBackendConfig),
    File(FileBackendConfig),
    Vector(VectorBackendConfig),
}

/// One configured backend instance
///
/// The options variant carries the backend's own configuration struct;
/// the instance name lives inside it. Disabled definitions are kept in
/// the config but never instantiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDefinition {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(flatten)]
    pub options: BackendOptions,
}

fn default_enabled() -> bool {
    true
}

impl BackendDefinition {
    pub fn memory(config: MemoryBackendConfig) -> Self {
        Self {
            enabled: true,
            options: BackendOptions::Memory(config),
        }
    }

    pub fn file(config: FileBackendConfig) -> Self {
        Self {
            enabled: true,
            options: BackendOptions::File(config),
        }
    }

    pub fn vector(config: VectorBackendConfig) -> Self {
        Self {
            enabled: true,
            options: BackendOptions::Vector(config),
        }
    }

    /// Builder: mark this definition disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn kind(&self) -> BackendKind {
        match &self.options {
            BackendOptions::Memory(_) => BackendKind::Memory,
            BackendOptions::File(_) => BackendKind::File,
            BackendOptions::Vector(_) => BackendKind::Vector,
        }
    }

    pub fn name(&self) -> &str {
        match &self.options {
            BackendOptions::Memory(config) => &config.name,
            BackendOptions::File(config) => &config.name,
            BackendOptions::Vector(config) => &config.name,
        }
    }
}

/// Weights of the fused hybrid search score
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridWeights {
    /// Weight of vector similarity
    pub semantic: f64,

    /// Weight of recency, `exp(-age_hours / 24)` over `last_accessed`
    pub recency: f64,

    /// Weight of the item's importance score
    pub importance: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            recency: 0.3,
            importance: 0.2,
        }
    }
}

/// Memory manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Backend serving each tier, by instance name
    pub tier_mapping: HashMap<MemoryTier, String>,

    /// All configured backend instances
    pub backends: Vec<BackendDefinition>,

    /// Per-tier item counts that trigger migration when reached
    pub tier_capacities: HashMap<MemoryTier, usize>,

    /// Interval of the scheduled migration sweep; store-triggered checks
    /// only when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_migration_interval: Option<Duration>,

    /// Embed unembedded items on store
    pub enable_vectorization: bool,

    /// Dimension of generated embeddings
    pub vector_dimension: usize,

    /// Hybrid search ranking weights
    #[serde(default)]
    pub hybrid_weights: HybridWeights,
}

fn default_capacities() -> HashMap<MemoryTier, usize> {
    HashMap::from([
        (MemoryTier::Working, 100),
        (MemoryTier::ShortTerm, 1_000),
        (MemoryTier::LongTerm, 10_000),
        (MemoryTier::Archival, 100_000),
    ])
}

impl Default for ManagerConfig {
    /// Single in-memory backend serving every tier
    fn default() -> Self {
        let memory = MemoryBackendConfig::default();
        let name = memory.name.clone();
        Self {
            tier_mapping: MemoryTier::all()
                .into_iter()
                .map(|tier| (tier, name.clone()))
                .collect(),
            backends: vec![BackendDefinition::memory(memory)],
            tier_capacities: default_capacities(),
            auto_migration_interval: Some(Duration::from_secs(60)),
            enable_vectorization: true,
            vector_dimension: 384,
            hybrid_weights: HybridWeights::default(),
        }
    }
}

impl ManagerConfig {
    /// Create config for testing: a memory backend for the working tier,
    /// a file backend for the rest, and an unmapped vector backend
    /// reachable by name and through semantic search
    pub fn for_testing(data_dir: &Path) -> Self {
        let memory = MemoryBackendConfig::for_testing().with_name("memory");
        let file = FileBackendConfig::for_testing(data_dir).with_name("file");
        let vector = VectorBackendConfig::for_testing().with_name("vector");
        let vector_dimension = vector.dimension;

        Self {
            tier_mapping: HashMap::from([
                (MemoryTier::Working, "memory".to_string()),
                (MemoryTier::ShortTerm, "file".to_string()),
                (MemoryTier::LongTerm, "file".to_string()),
                (MemoryTier::Archival, "file".to_string()),
            ]),
            backends: vec![
                BackendDefinition::memory(memory),
                BackendDefinition::file(file),
                BackendDefinition::vector(vector),
            ],
            tier_capacities: default_capacities(),
            auto_migration_interval: None,
            enable_vectorization: true,
            vector_dimension,
            hybrid_weights: HybridWeights::default(),
        }
    }

    /// Builder: set one tier's capacity threshold
    pub fn with_capacity(mut self, tier: MemoryTier, capacity: usize) -> Self {
        self.tier_capacities.insert(tier, capacity);
        self
    }

    /// Builder: set the scheduled migration interval
    pub fn with_auto_migration(mut self, interval: Duration) -> Self {
        self.auto_migration_interval = Some(interval);
        self
    }

    /// Builder: disable embedding generation on store
    pub fn without_vectorization(mut self) -> Self {
        self.enable_vectorization = false;
        self
    }

    /// Capacity threshold for a tier; tiers without one never migrate
    /// on count
    pub fn capacity(&self, tier: MemoryTier) -> Option<usize> {
        self.tier_capacities.get(&tier).copied()
    }

    /// Check the mapping is internally consistent: backend names are
    /// unique, every tier is mapped, and every mapped name refers to an
    /// enabled backend
    pub fn validate(&self) -> Result<()> {
        let mut names = std::collections::HashSet::new();
        for definition in &self.backends {
            if !names.insert(definition.name()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate backend name: {}",
                    definition.name()
                )));
            }
        }

        let enabled: std::collections::HashSet<&str> = self
            .backends
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.name())
            .collect();
        for tier in MemoryTier::all() {
            match self.tier_mapping.get(&tier) {
                None => {
                    return Err(Error::InvalidConfig(format!(
                        "tier {tier} has no backend mapping"
                    )));
                }
                Some(name) if !enabled.contains(name.as_str()) => {
                    return Err(Error::InvalidConfig(format!(
                        "tier {tier} maps to unknown or disabled backend {name}"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_maps_every_tier() {
        let config = ManagerConfig::default();
        config.validate().unwrap();
        for tier in MemoryTier::all() {
            assert_eq!(config.tier_mapping.get(&tier), Some(&"memory".to_string()));
        }
        assert_eq!(config.capacity(MemoryTier::Working), Some(100));
        assert_eq!(config.capacity(MemoryTier::Archival), Some(100_000));
    }

    #[test]
    fn test_for_testing_stack() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ManagerConfig::for_testing(dir.path());
        config.validate().unwrap();

        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.backends[2].kind(), BackendKind::Vector);
        assert_eq!(config.vector_dimension, 4);
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let mut config = ManagerConfig::default();
        config
            .tier_mapping
            .insert(MemoryTier::Working, "ghost".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_mapping_to_disabled_backend() {
        let mut config = ManagerConfig::default();
        config.backends[0].enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = ManagerConfig::default();
        config
            .backends
            .push(BackendDefinition::memory(MemoryBackendConfig::default()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_definition_serialized_form() {
        let definition = BackendDefinition::memory(MemoryBackendConfig::default());
        let json = serde_json::to_value(&definition).unwrap();
        assert_eq!(json["enabled"], true);
        assert_eq!(json["kind"], "memory");
        assert_eq!(json["options"]["name"], "memory");
    }

    #[test]
    fn test_weights_default() {
        let weights = HybridWeights::default();
        assert!((weights.semantic + weights.recency + weights.importance - 1.0).abs() < 1e-9);
    }
}
