//! Storage statistics and health reporting

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::item::{MemoryItem, MemoryItemType, MemoryTier};

/// Aggregated storage counters
///
/// Derived on demand from the backing store, never mutated independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    /// Total number of stored items
    pub total_items: usize,

    /// Item count per tier
    pub items_by_tier: HashMap<MemoryTier, usize>,

    /// Item count per item type
    pub items_by_type: HashMap<MemoryItemType, usize>,

    /// Approximate total serialized size
    pub total_size_bytes: usize,

    /// Approximate average item size, zero when empty
    pub average_item_size: usize,
}

impl StorageStats {
    /// Compute stats over a snapshot of items
    pub fn compute<'a>(items: impl IntoIterator<Item = &'a MemoryItem>) -> Self {
        let mut stats = StorageStats::default();
        for item in items {
            stats.total_items += 1;
            *stats.items_by_tier.entry(item.tier).or_insert(0) += 1;
            *stats.items_by_type.entry(item.item_type).or_insert(0) += 1;
            stats.total_size_bytes += item.approximate_size();
        }
        if stats.total_items > 0 {
            stats.average_item_size = stats.total_size_bytes / stats.total_items;
        }
        stats
    }

    /// Item count for one tier
    pub fn tier_count(&self, tier: MemoryTier) -> usize {
        self.items_by_tier.get(&tier).copied().unwrap_or(0)
    }

    /// Fold another backend's stats into this aggregate
    pub fn merge(&mut self, other: &StorageStats) {
        self.total_items += other.total_items;
        for (tier, count) in &other.items_by_tier {
            *self.items_by_tier.entry(*tier).or_insert(0) += count;
        }
        for (item_type, count) in &other.items_by_type {
            *self.items_by_type.entry(*item_type).or_insert(0) += count;
        }
        self.total_size_bytes += other.total_size_bytes;
        if self.total_items > 0 {
            self.average_item_size = self.total_size_bytes / self.total_items;
        }
    }
}

/// Result of a backend health check
///
/// Health checks never fail; problems are reported through this value.
/// A healthy status with a non-empty warning message means degraded but
/// operational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: "ok".to_string(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }

    /// True for a healthy status carrying a warning message
    pub fn is_degraded(&self) -> bool {
        self.healthy && self.message != "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_compute() {
        let items = vec![
            MemoryItem::new("a", MemoryItemType::Fact).with_tier(MemoryTier::Working),
            MemoryItem::new("b", MemoryItemType::Fact).with_tier(MemoryTier::Working),
            MemoryItem::new("c", MemoryItemType::Error).with_tier(MemoryTier::Archival),
        ];
        let stats = StorageStats::compute(items.iter());

        assert_eq!(stats.total_items, 3);
        assert_eq!(stats.tier_count(MemoryTier::Working), 2);
        assert_eq!(stats.tier_count(MemoryTier::Archival), 1);
        assert_eq!(stats.tier_count(MemoryTier::LongTerm), 0);
        assert_eq!(stats.items_by_type.get(&MemoryItemType::Fact), Some(&2));
        assert!(stats.total_size_bytes > 0);
        assert!(stats.average_item_size > 0);
    }

    #[test]
    fn test_stats_empty() {
        let stats = StorageStats::compute(std::iter::empty());
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.average_item_size, 0);
    }

    #[test]
    fn test_stats_merge() {
        let a = StorageStats::compute(
            [&MemoryItem::new("a", MemoryItemType::Fact).with_tier(MemoryTier::Working)]
                .into_iter(),
        );
        let b = StorageStats::compute(
            [&MemoryItem::new("b", MemoryItemType::Error).with_tier(MemoryTier::Working)]
                .into_iter(),
        );

        let mut merged = a.clone();
        merged.merge(&b);
        assert_eq!(merged.total_items, 2);
        assert_eq!(merged.tier_count(MemoryTier::Working), 2);
    }

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::healthy().healthy);
        assert!(!HealthStatus::healthy().is_degraded());

        let warn = HealthStatus::warning("low disk space: 8% free");
        assert!(warn.healthy);
        assert!(warn.is_degraded());

        let bad = HealthStatus::unhealthy("disk full");
        assert!(!bad.healthy);
    }
}
