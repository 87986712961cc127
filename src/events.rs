//! Events published by the metrics aggregator.
//!
//! Consumers subscribe to a broadcast channel instead of hooking into the
//! aggregator itself. Publishing never blocks and never fails: events sent
//! while nobody is subscribed are dropped, and slow subscribers observe
//! `RecvError::Lagged` rather than holding up collection.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{MetricsSnapshot, Period};

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricsEvent {
    /// A snapshot was built and persisted.
    SnapshotCollected { snapshot_id: String, period: Period },

    /// A scheduled collection cycle failed; later cycles still run.
    CollectionFailed { period: Period, error: String },

    /// Retention cleanup removed old snapshots.
    MetricsCleaned { deleted: u64 },

    /// Fresh realtime figures for live dashboards.
    DashboardUpdated { snapshot: Box<MetricsSnapshot> },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MetricsEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricsEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: MetricsEvent) {
        // An error only means there are no subscribers right now
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
