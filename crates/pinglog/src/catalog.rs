//! Disk-derived listing of the log directory.
//!
//! Nothing is cached between calls: every listing reads the directory again,
//! so it always reflects writes, deletes and archive passes that completed
//! before the call. The catalog also owns the gate that keeps flushes out of
//! an archive pass (shared for writers, exclusive for the archiver).

use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::events::EventBus;
use crate::record::parse_log_day;
use crate::ARCHIVE_FILE_NAME;

pub struct LogCatalog {
    dir: PathBuf,
    archive_name: String,
    gate: RwLock<()>,
}

impl LogCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), archive_name: ARCHIVE_FILE_NAME.to_string(), gate: RwLock::new(()) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive_path(&self) -> PathBuf {
        self.dir.join(&self.archive_name)
    }

    /// Sorted names of the regular files in the log directory.
    ///
    /// A missing directory lists as empty. The archive's in-progress temp file
    /// is never listed.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let staging = format!("{}.tmp", self.archive_name);
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name != staging {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// True iff the file's embedded day is strictly before `cutoff`.
    /// The archive container and names without a day never qualify.
    pub fn is_archivable(&self, file_name: &str, cutoff: NaiveDate) -> bool {
        if file_name == self.archive_name {
            return false;
        }
        parse_log_day(file_name).is_some_and(|day| day < cutoff)
    }

    /// Listed files that [`is_archivable`](Self::is_archivable) selects
    pub fn archivable(&self, cutoff: NaiveDate) -> io::Result<Vec<String>> {
        Ok(self.list()?.into_iter().filter(|name| self.is_archivable(name, cutoff)).collect())
    }

    /// Full path of a listed file. Anything not in the current listing,
    /// including names with path components, resolves to `None`.
    pub fn resolve(&self, file_name: &str) -> io::Result<Option<PathBuf>> {
        if file_name.contains(['/', '\\']) {
            return Ok(None);
        }
        Ok(self.list()?.iter().any(|name| name == file_name).then(|| self.dir.join(file_name)))
    }

    /// Re-list the directory and announce the result
    pub fn refresh(&self, bus: &EventBus) -> io::Result<Vec<String>> {
        let files = self.list()?;
        bus.publish_files(files.clone());
        Ok(files)
    }

    /// Held by log writers while appending
    pub fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    /// Held by the archiver for a whole pass
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }
}
