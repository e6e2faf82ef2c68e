//! Memory items, tiers, and item types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Storage tier for a memory item
///
/// Tiers form a fixed migration chain: items displaced from an
/// over-capacity tier move to the next tier in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Immediate context, smallest capacity
    Working,
    /// Recent items, default tier for new writes
    ShortTerm,
    /// Durable items that survived short-term pressure
    LongTerm,
    /// Terminal tier; evicts instead of migrating
    Archival,
}

impl MemoryTier {
    /// All tiers in migration order
    pub fn all() -> [MemoryTier; 4] {
        [
            MemoryTier::Working,
            MemoryTier::ShortTerm,
            MemoryTier::LongTerm,
            MemoryTier::Archival,
        ]
    }

    /// The tier items migrate to when this tier is over capacity.
    /// `None` for the terminal tier.
    pub fn next(&self) -> Option<MemoryTier> {
        match self {
            MemoryTier::Working => Some(MemoryTier::ShortTerm),
            MemoryTier::ShortTerm => Some(MemoryTier::LongTerm),
            MemoryTier::LongTerm => Some(MemoryTier::Archival),
            MemoryTier::Archival => None,
        }
    }

    /// Snake-case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Working => "working",
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::LongTerm => "long_term",
            MemoryTier::Archival => "archival",
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content a memory item records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryItemType {
    /// A conversation turn
    Conversation,
    /// A standalone fact
    Fact,
    /// A user preference
    Preference,
    /// A record of a skill/tool invocation
    SkillUsage,
    /// An error the agent observed
    Error,
    /// Feedback from the user
    Feedback,
    /// Ambient context (working set, environment)
    Context,
    /// A configuration parameter
    Parameter,
    /// An agent self-reflection
    Reflection,
    /// Distilled knowledge
    Knowledge,
}

impl MemoryItemType {
    /// Snake-case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryItemType::Conversation => "conversation",
            MemoryItemType::Fact => "fact",
            MemoryItemType::Preference => "preference",
            MemoryItemType::SkillUsage => "skill_usage",
            MemoryItemType::Error => "error",
            MemoryItemType::Feedback => "feedback",
            MemoryItemType::Context => "context",
            MemoryItemType::Parameter => "parameter",
            MemoryItemType::Reflection => "reflection",
            MemoryItemType::Knowledge => "knowledge",
        }
    }
}

impl std::fmt::Display for MemoryItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The universal memory record stored by every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique id within a backend
    pub id: String,

    /// Item content
    pub content: String,

    /// Optional embedding vector; fixed dimension per vector backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Tier currently holding this item
    pub tier: MemoryTier,

    /// Kind of content
    #[serde(rename = "type")]
    pub item_type: MemoryItemType,

    /// Importance score in 0.0..=1.0, drives migration and eviction
    pub importance: f64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Timestamp of the most recent read
    pub last_accessed: DateTime<Utc>,

    /// Number of reads since creation
    pub access_count: u64,

    /// Optional time-to-live, measured from `created_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,

    /// Open key/value map (tags, session id, source, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryItem {
    /// Create a new item with a generated id, default tier and importance
    pub fn new(content: impl Into<String>, item_type: MemoryItemType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            embedding: None,
            tier: MemoryTier::ShortTerm,
            item_type,
            importance: 0.5,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl: None,
            metadata: HashMap::new(),
        }
    }

    /// Builder: set an explicit id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: set the tier
    pub fn with_tier(mut self, tier: MemoryTier) -> Self {
        self.tier = tier;
        self
    }

    /// Builder: set the importance score
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Builder: attach an embedding vector
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Builder: set a time-to-live
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Builder: insert one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builder: set tags (stored under the `tags` metadata key)
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.metadata.insert(
            "tags".to_string(),
            serde_json::Value::Array(tags.into_iter().map(serde_json::Value::String).collect()),
        );
        self
    }

    /// Tags attached to this item, empty when none
    pub fn tags(&self) -> Vec<String> {
        match self.metadata.get("tags") {
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True when this item carries every requested tag
    pub fn has_all_tags(&self, requested: &[String]) -> bool {
        let own = self.tags();
        requested.iter().all(|t| own.contains(t))
    }

    /// True when the item's TTL has elapsed relative to `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        // A TTL too large to represent can never elapse
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        match self.created_at.checked_add_signed(ttl) {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Record a read: bump the access counter and refresh `last_accessed`
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }

    /// Approximate serialized size in bytes, used for storage stats
    pub fn approximate_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or_else(|_| {
            self.content.len() + self.embedding.as_ref().map_or(0, |e| e.len() * 4)
        })
    }

    /// Validate write-time invariants
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(Error::InvalidImportance(self.importance));
        }
        Ok(())
    }
}
