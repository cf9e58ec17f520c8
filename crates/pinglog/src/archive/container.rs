//! The rolling zip archive of old day logs.
//!
//! Entries are tracked by name. Entries kept from the previous archive are
//! copied raw (without recompressing) when the container is persisted; entries
//! upserted from disk are streamed in with Deflate.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::result::{ZipError, ZipResult};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

#[derive(Debug)]
enum EntrySource {
    /// Kept as-is from the archive this container was loaded from
    Archived,
    /// Read from a file on disk at persist time
    Disk(PathBuf),
}

pub struct ArchiveContainer {
    previous: Option<ZipArchive<File>>,
    entries: BTreeMap<String, EntrySource>,
}

impl ArchiveContainer {
    pub fn empty() -> Self {
        Self { previous: None, entries: BTreeMap::new() }
    }

    /// Open an existing archive
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let load_err = |source| ArchiveError::Load { path: path.to_path_buf(), source };

        let file = File::open(path).map_err(|e| load_err(ZipError::Io(e)))?;
        let archive = ZipArchive::new(file).map_err(load_err)?;
        let entries =
            archive.file_names().map(|name| (name.to_string(), EntrySource::Archived)).collect();

        Ok(Self { previous: Some(archive), entries })
    }

    /// Open the archive at `path`, or start an empty one if there is none yet
    pub fn load_or_create(path: &Path) -> Result<Self, ArchiveError> {
        if path.exists() { Self::open(path) } else { Ok(Self::empty()) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Point entry `name` at the file `source`, replacing any entry of that name
    pub fn upsert(&mut self, name: impl Into<String>, source: impl Into<PathBuf>) -> Upsert {
        match self.entries.insert(name.into(), EntrySource::Disk(source.into())) {
            Some(_) => Upsert::Replaced,
            None => Upsert::Inserted,
        }
    }

    /// Write the container to `target`.
    ///
    /// The archive is built next to the target as `<target>.tmp`, synced, then
    /// renamed over the target. On failure the temp file is removed and the
    /// previous archive is left untouched.
    pub fn persist(mut self, target: &Path) -> Result<(), ArchiveError> {
        let staging = staging_path(target);
        let persist_err = |source| ArchiveError::Persist { path: target.to_path_buf(), source };

        if let Err(e) = self.write_to(&staging) {
            let _ = fs::remove_file(&staging);
            return Err(persist_err(e));
        }

        // release the old archive before replacing it
        self.previous = None;
        fs::rename(&staging, target).map_err(|e| {
            let _ = fs::remove_file(&staging);
            persist_err(ZipError::Io(e))
        })
    }

    fn write_to(&mut self, staging: &Path) -> ZipResult<()> {
        let Self { previous, entries } = self;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(BufWriter::new(File::create(staging)?));

        for (name, source) in entries.iter() {
            match source {
                EntrySource::Archived => {
                    let previous = previous.as_mut().ok_or(ZipError::FileNotFound)?;
                    zip.raw_copy_file(previous.by_name(name)?)?;
                }
                EntrySource::Disk(path) => {
                    let mut file = File::open(path)?;
                    zip.start_file(name.as_str(), options)?;
                    io::copy(&mut file, &mut zip)?;
                }
            }
        }

        let mut out = zip.finish()?;
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(())
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}
