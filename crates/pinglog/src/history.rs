//! Recent probe history replayed to newly connected listeners.
//!
//! Independent of the flush cache: history keeps every probe of the last few
//! hours whether or not it has been written, and is rebuilt from today's logs
//! at startup.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::LogCatalog;
use crate::record::{log_file_name, Latency};
use crate::writer::{read_log, LogError};

/// Hours of history kept unless configured otherwise
pub const DEFAULT_HISTORY_HOURS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub time: DateTime<Utc>,
    pub ping: Latency,
}

pub struct RecentHistory {
    window: TimeDelta,
    hosts: Vec<String>,
    slots: HashMap<String, Mutex<VecDeque<HistoryPoint>>>,
}

impl RecentHistory {
    pub fn new(hosts: &[String], hours: u32) -> Self {
        let slots = hosts.iter().map(|host| (host.clone(), Mutex::new(VecDeque::new()))).collect();
        Self { window: TimeDelta::hours(i64::from(hours)), hosts: hosts.to_vec(), slots }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// Append a point; unknown hosts are ignored
    pub fn push(&self, host: &str, time: DateTime<Utc>, ping: Latency) {
        if let Some(slot) = self.slots.get(host) {
            slot.lock().push_back(HistoryPoint { time, ping });
        }
    }

    pub fn snapshot(&self, host: &str) -> Vec<HistoryPoint> {
        self.slots.get(host).map(|slot| slot.lock().iter().copied().collect()).unwrap_or_default()
    }

    /// History of every host, in configuration order
    pub fn snapshot_all(&self) -> Vec<(String, Vec<HistoryPoint>)> {
        self.hosts.iter().map(|host| (host.clone(), self.snapshot(host))).collect()
    }

    /// Drop points older than the window, returning how many were removed
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let mut removed = 0;
        for slot in self.slots.values() {
            let mut points = slot.lock();
            let before = points.len();
            points.retain(|point| point.time > cutoff);
            removed += before - points.len();
        }
        debug!(removed, "Pruned probe history");
        removed
    }

    /// Load `today`'s day logs into the history, returning the number of points read
    pub fn rehydrate(&self, catalog: &LogCatalog, today: NaiveDate) -> Result<usize, LogError> {
        let mut loaded = 0;
        for host in &self.hosts {
            let path = catalog.dir().join(log_file_name(host, today));
            let points = read_log(&path)?;
            loaded += points.len();
            if let Some(slot) = self.slots.get(host) {
                let mut slot = slot.lock();
                slot.extend(points.into_iter().map(|(time, ping)| HistoryPoint { time, ping }));
                slot.make_contiguous().sort_by_key(|point| point.time);
            }
        }
        info!(points = loaded, "Loaded today's probe history");
        Ok(loaded)
    }
}
