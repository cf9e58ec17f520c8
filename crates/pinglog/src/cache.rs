//! In-memory buffer of probe results awaiting a flush to disk.
//!
//! The set of hosts is fixed when the cache is built, so the host map itself
//! is immutable and only the per-host slots are locked. Entries leave the
//! cache exclusively through [`ResultCache::drain`] and
//! [`ResultCache::drain_all`]; whoever drains is responsible for writing them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::record::{Latency, ProbeRecord};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
}

/// Outcome of [`ResultCache::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    /// Sequence number assigned to the new record
    pub seq: u64,
    /// Number of entries buffered for the host after the insert
    pub len: usize,
    /// Buffered entries exceed the flush threshold
    pub needs_flush: bool,
}

/// Per-host ordered buffer of probe records
pub struct ResultCache {
    hosts: Vec<String>,
    slots: HashMap<String, Mutex<Vec<ProbeRecord>>>,
    next_seq: AtomicU64,
    threshold: usize,
}

impl ResultCache {
    /// Create an empty cache for a fixed set of hosts
    pub fn new<I, S>(hosts: I, threshold: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut slots = HashMap::new();
        for host in hosts {
            let host = host.into();
            if slots.insert(host.clone(), Mutex::new(Vec::new())).is_none() {
                ordered.push(host);
            }
        }

        Self { hosts: ordered, slots, next_seq: AtomicU64::new(0), threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Hosts in configuration order
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Insert a probe result. No deduplication is attempted.
    pub fn record(
        &self,
        host: &str,
        at: DateTime<Utc>,
        latency: Latency,
    ) -> Result<Recorded, CacheError> {
        let slot = self.slot(host)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut entries = slot.lock();
        entries.push(ProbeRecord { seq, at, latency });
        let len = entries.len();

        Ok(Recorded { seq, len, needs_flush: len > self.threshold })
    }

    /// Copy of the host's buffered entries, in insertion order
    pub fn snapshot(&self, host: &str) -> Result<Vec<ProbeRecord>, CacheError> {
        Ok(self.slot(host)?.lock().clone())
    }

    /// Take every buffered entry of a host, leaving its slot empty
    pub fn drain(&self, host: &str) -> Result<Vec<ProbeRecord>, CacheError> {
        Ok(std::mem::take(&mut *self.slot(host)?.lock()))
    }

    /// Drain every host. Hosts with nothing buffered are omitted.
    pub fn drain_all(&self) -> Vec<(String, Vec<ProbeRecord>)> {
        self.hosts
            .iter()
            .filter_map(|host| {
                let entries = std::mem::take(&mut *self.slots[host].lock());
                (!entries.is_empty()).then(|| (host.clone(), entries))
            })
            .collect()
    }

    /// Number of buffered entries for a host, `0` for unknown hosts
    pub fn len(&self, host: &str) -> usize {
        self.slots.get(host).map(|slot| slot.lock().len()).unwrap_or(0)
    }

    /// True when no host has anything buffered
    pub fn is_empty(&self) -> bool {
        self.slots.values().all(|slot| slot.lock().is_empty())
    }

    fn slot(&self, host: &str) -> Result<&Mutex<Vec<ProbeRecord>>, CacheError> {
        self.slots.get(host).ok_or_else(|| CacheError::UnknownHost(host.to_string()))
    }
}
