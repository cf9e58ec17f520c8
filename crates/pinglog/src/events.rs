//! Notifications emitted towards the push channel.
//!
//! Delivery to browsers or other consumers is up to whoever subscribes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::record::Latency;
use crate::stats::HostStats;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PingEvent {
    /// The probed host list, hosts are fixed so this only goes out on connect
    HostsChanged(Vec<String>),
    /// The log directory listing changed (file created, archived or deleted)
    FilesChanged(Vec<String>),
    /// Fresh per-host statistics
    StatsUpdated(Vec<HostStats>),
    /// A single probe completed
    ProbeRecorded { host: String, time: DateTime<Utc>, ping: Latency },
}

/// Broadcast fan-out of [`PingEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PingEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish_files(&self, files: Vec<String>) {
        debug!(count = files.len(), "Publishing file catalog");
        self.publish(PingEvent::FilesChanged(files));
    }

    pub fn publish_stats(&self, stats: Vec<HostStats>) {
        debug!(hosts = stats.len(), "Publishing statistics");
        self.publish(PingEvent::StatsUpdated(stats));
    }

    pub fn publish(&self, event: PingEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
