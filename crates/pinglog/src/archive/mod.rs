//! Compaction of stale day logs into the rolling archive.
//!
//! A pass runs Select, Load-or-Create, Merge, Persist, Purge while holding
//! the catalog gate exclusively, so no flush can append to a selected file
//! between the moment it is copied and the moment it is deleted. Sources are
//! only deleted after the new archive has been renamed into place.

mod container;

pub use container::{ArchiveContainer, Upsert};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use tracing::{debug, info, warn};
use zip::result::ZipError;

use crate::catalog::LogCatalog;
use crate::events::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to list log directory: {0}")]
    Catalog(#[source] io::Error),
    #[error("failed to load archive {path}: {source}")]
    Load { path: PathBuf, #[source] source: ZipError },
    #[error("failed to write archive {path}: {source}")]
    Persist { path: PathBuf, #[source] source: ZipError },
}

#[derive(Debug)]
pub struct PurgeFailure {
    pub file: String,
    pub error: io::Error,
}

#[derive(Debug)]
pub struct ArchiveReport {
    /// Files older than this day were selected
    pub cutoff: NaiveDate,
    /// Every file written into the archive
    pub archived: Vec<String>,
    /// Subset of `archived` that replaced an existing entry
    pub replaced: Vec<String>,
    /// Archived files that could not be deleted afterwards
    pub purge_failures: Vec<PurgeFailure>,
}

#[derive(Debug)]
pub enum ArchiveOutcome {
    /// Nothing predates the cutoff; the archive was not touched
    NothingToArchive,
    Archived(ArchiveReport),
}

pub struct Archiver {
    catalog: Arc<LogCatalog>,
    bus: EventBus,
    retention_days: u32,
}

impl Archiver {
    pub fn new(catalog: Arc<LogCatalog>, bus: EventBus, retention_days: u32) -> Self {
        Self { catalog, bus, retention_days }
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Files dated strictly before this day are archivable
    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        today.checked_sub_days(Days::new(u64::from(self.retention_days))).unwrap_or(NaiveDate::MIN)
    }

    /// Run one pass relative to the current UTC day
    pub fn run(&self) -> Result<ArchiveOutcome, ArchiveError> {
        self.run_at(Utc::now().date_naive())
    }

    /// Run one pass relative to `today`
    pub fn run_at(&self, today: NaiveDate) -> Result<ArchiveOutcome, ArchiveError> {
        let gate = self.catalog.exclusive();
        let cutoff = self.cutoff(today);

        let selected = self.catalog.archivable(cutoff).map_err(ArchiveError::Catalog)?;
        if selected.is_empty() {
            debug!(%cutoff, "No logs to archive");
            return Ok(ArchiveOutcome::NothingToArchive);
        }
        info!(count = selected.len(), %cutoff, "Archiving logs");

        let archive_path = self.catalog.archive_path();
        let mut container = ArchiveContainer::load_or_create(&archive_path)?;
        if container.is_empty() {
            info!(path = %archive_path.display(), "Creating new archive");
        }

        let mut replaced = Vec::new();
        for name in &selected {
            debug!(file = %name, "Adding to archive");
            if container.upsert(name.as_str(), self.catalog.dir().join(name)) == Upsert::Replaced {
                info!(file = %name, "Already archived, replacing with current contents");
                replaced.push(name.clone());
            }
        }

        container.persist(&archive_path)?;
        info!(path = %archive_path.display(), "Archive written");

        let purge_failures = self.purge(&selected);
        drop(gate);

        if let Err(e) = self.catalog.refresh(&self.bus) {
            warn!("Failed to refresh log catalog: {}", e);
        }

        Ok(ArchiveOutcome::Archived(ArchiveReport {
            cutoff,
            archived: selected,
            replaced,
            purge_failures,
        }))
    }

    /// Delete archived sources. A file that is already gone counts as purged;
    /// any other error is reported and the remaining files are still tried.
    fn purge(&self, selected: &[String]) -> Vec<PurgeFailure> {
        let mut failures = Vec::new();
        for name in selected {
            match std::fs::remove_file(self.catalog.dir().join(name)) {
                Ok(()) => debug!(file = %name, "Deleted archived log"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %name, "Archived log already gone")
                }
                Err(error) => {
                    warn!(file = %name, "Failed to delete archived log: {}", error);
                    failures.push(PurgeFailure { file: name.clone(), error });
                }
            }
        }
        failures
    }

    /// Run a pass on the blocking pool
    pub async fn run_blocking(self: Arc<Self>) -> anyhow::Result<ArchiveOutcome> {
        Ok(tokio::task::spawn_blocking(move || self.run()).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff() {
        let catalog = Arc::new(LogCatalog::new("logs"));
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let archiver = Archiver::new(catalog.clone(), EventBus::default(), 0);
        assert_eq!(archiver.cutoff(today), today);

        let archiver = Archiver::new(catalog, EventBus::default(), 3);
        assert_eq!(archiver.cutoff(today), NaiveDate::from_ymd_opt(2024, 2, 27).unwrap());
    }

    #[test]
    fn test_purge_keeps_going_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(LogCatalog::new(dir.path()));
        let archiver = Archiver::new(catalog, EventBus::default(), 0);

        std::fs::write(dir.path().join("a-2024-01-01.log"), "a\n").unwrap();
        std::fs::write(dir.path().join("c-2024-01-01.log"), "c\n").unwrap();
        // unlinking a directory fails
        std::fs::create_dir(dir.path().join("b-2024-01-01.log")).unwrap();

        let selected: Vec<String> =
            ["a-2024-01-01.log", "b-2024-01-01.log", "gone-2024-01-01.log", "c-2024-01-01.log"]
                .map(String::from)
                .to_vec();
        let failures = archiver.purge(&selected);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].file, "b-2024-01-01.log");
        assert!(!dir.path().join("a-2024-01-01.log").exists());
        assert!(!dir.path().join("c-2024-01-01.log").exists());
    }
}
