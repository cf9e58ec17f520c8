//! Day-partitioned, append-only probe logs.
//!
//! A batch is split by the UTC day of each record, never by the time of the
//! flush, so a batch straddling midnight lands in two files. Appends for one
//! host are serialized by a per-host lock that is held across drain and write:
//! two flushes of the same host can neither interleave lines nor reorder
//! batches, and every drained record belongs to exactly one batch.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, ResultCache};
use crate::catalog::LogCatalog;
use crate::events::EventBus;
use crate::record::{format_line, log_file_name, parse_line, Latency, ProbeRecord};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir { path: PathBuf, #[source] source: io::Error },
    #[error("failed to append to {path}: {source}")]
    Append { path: PathBuf, #[source] source: io::Error },
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, #[source] source: io::Error },
}

/// What a single flush did, per day file
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Files appended to, with the number of records each received
    pub written: Vec<(String, usize)>,
    /// Files that did not exist before this flush
    pub created: Vec<String>,
    /// Day groups that could not be written; their records are dropped
    pub failed: Vec<(String, usize)>,
}

impl FlushReport {
    pub fn records_written(&self) -> usize {
        self.written.iter().map(|(_, count)| count).sum()
    }

    pub fn records_dropped(&self) -> usize {
        self.failed.iter().map(|(_, count)| count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.failed.is_empty()
    }
}

pub struct DayLogWriter {
    catalog: Arc<LogCatalog>,
    bus: EventBus,
    host_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DayLogWriter {
    /// Create the writer, making sure the log directory exists
    pub fn new(catalog: Arc<LogCatalog>, bus: EventBus) -> Result<Self, LogError> {
        fs::create_dir_all(catalog.dir())
            .map_err(|source| LogError::CreateDir { path: catalog.dir().to_path_buf(), source })?;

        Ok(Self { catalog, bus, host_locks: Mutex::new(HashMap::new()) })
    }

    /// Append an already drained batch for `host`
    pub fn flush(&self, host: &str, entries: Vec<ProbeRecord>) -> FlushReport {
        let lock = self.host_lock(host);
        let _serial = lock.lock();
        self.append_batch(host, entries)
    }

    /// Drain `host` from the cache and append what was drained
    pub fn flush_host(&self, cache: &ResultCache, host: &str) -> Result<FlushReport, CacheError> {
        let lock = self.host_lock(host);
        let _serial = lock.lock();
        let entries = cache.drain(host)?;
        Ok(self.append_batch(host, entries))
    }

    /// Flush every host of the cache, used on shutdown and when the last listener leaves
    pub fn flush_all(&self, cache: &ResultCache) -> Vec<(String, FlushReport)> {
        cache
            .hosts()
            .iter()
            .filter_map(|host| match self.flush_host(cache, host) {
                Ok(report) if !report.is_empty() => Some((host.clone(), report)),
                Ok(_) => None,
                Err(e) => {
                    warn!(host = %host, "Flush skipped: {}", e);
                    None
                }
            })
            .collect()
    }

    fn host_lock(&self, host: &str) -> Arc<Mutex<()>> {
        self.host_locks.lock().entry(host.to_string()).or_default().clone()
    }

    fn append_batch(&self, host: &str, mut entries: Vec<ProbeRecord>) -> FlushReport {
        let mut report = FlushReport::default();
        if entries.is_empty() {
            return report;
        }
        entries.sort_by_key(ProbeRecord::sort_key);

        let mut days: BTreeMap<NaiveDate, (String, usize)> = BTreeMap::new();
        for record in &entries {
            let (lines, count) = days.entry(record.day()).or_default();
            lines.push_str(&format_line(record.at, record.latency));
            *count += 1;
        }

        {
            let _gate = self.catalog.shared();
            for (day, (lines, count)) in days {
                let name = log_file_name(host, day);
                let path = self.catalog.dir().join(&name);
                match append_lines(&path, &lines) {
                    Ok(created) => {
                        if created {
                            info!(file = %name, "Started new day log");
                            report.created.push(name.clone());
                        }
                        report.written.push((name, count));
                    }
                    Err(e) => {
                        warn!(host = %host, records = count, "Dropping log batch: {}", e);
                        report.failed.push((name, count));
                    }
                }
            }
        }

        debug!(
            host = %host,
            written = report.records_written(),
            dropped = report.records_dropped(),
            "Flushed probe batch"
        );

        if !report.created.is_empty() {
            if let Err(e) = self.catalog.refresh(&self.bus) {
                warn!("Failed to refresh log catalog: {}", e);
            }
        }

        report
    }
}

/// Append to `path`, creating it if needed. Returns whether the file was created.
fn append_lines(path: &Path, lines: &str) -> Result<bool, LogError> {
    let append_err = |source| LogError::Append { path: path.to_path_buf(), source };

    let existed = path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path).map_err(append_err)?;
    file.write_all(lines.as_bytes()).map_err(append_err)?;
    file.sync_data().map_err(append_err)?;

    Ok(!existed)
}

/// Parse a day log back into `(timestamp, latency)` pairs.
///
/// A missing file reads as empty; blank and malformed lines are skipped.
pub fn read_log(path: &Path) -> Result<Vec<(DateTime<Utc>, Latency)>, LogError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(LogError::Read { path: path.to_path_buf(), source }),
    };

    Ok(text.lines().filter_map(parse_line).collect())
}
