//! Lifecycle events emitted by backends and the memory manager
//!
//! Events flow through an injected [`EventSink`] rather than inherited
//! emitter behavior, so consumers (telemetry, a TUI layer) subscribe by
//! handing in a sink implementation.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::item::MemoryTier;

/// A storage lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MemoryEvent {
    ItemStored {
        id: String,
        tier: MemoryTier,
        backend: String,
    },
    ItemUpdated {
        id: String,
        backend: String,
    },
    ItemDeleted {
        id: String,
        backend: String,
    },
    StorageFlushed {
        backend: String,
        items: usize,
    },
    StorageCleared {
        backend: String,
    },
    MigrationCompleted {
        from: MemoryTier,
        to: Option<MemoryTier>,
        migrated: usize,
        evicted: usize,
    },
}

/// Receiver for lifecycle events
///
/// Implementations must be cheap and non-blocking; sinks are invoked
/// inline from storage operations.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MemoryEvent);
}

/// Default sink that forwards events to the `tracing` subscriber
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: MemoryEvent) {
        match &event {
            MemoryEvent::MigrationCompleted {
                from,
                to,
                migrated,
                evicted,
            } => {
                info!(
                    from = %from,
                    to = to.map(|t| t.as_str()).unwrap_or("none"),
                    migrated,
                    evicted,
                    "migration completed"
                );
            }
            other => debug!(?other, "memory event"),
        }
    }
}

/// Sink that records every event, for assertions in tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MemoryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event seen so far
    pub fn events(&self) -> Vec<MemoryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Count of recorded events matching a predicate
    pub fn count_where(&self, pred: impl Fn(&MemoryEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: MemoryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
