//! Archive passes over a scratch log directory

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use pinglog::writer::read_log;
use pinglog::{
    ArchiveError, ArchiveOutcome, Archiver, DayLogWriter, EventBus, Latency, LogCatalog, PingEvent,
    ProbeRecord,
};
use tempfile::{tempdir, TempDir};
use zip::ZipArchive;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
}

fn setup(retention_days: u32) -> (TempDir, Arc<LogCatalog>, Archiver) {
    let dir = tempdir().unwrap();
    let catalog = Arc::new(LogCatalog::new(dir.path()));
    let archiver = Archiver::new(catalog.clone(), EventBus::default(), retention_days);
    (dir, catalog, archiver)
}

fn entry(archive: &Path, name: &str) -> String {
    let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut text = String::new();
    zip.by_name(name).unwrap().read_to_string(&mut text).unwrap();
    text
}

fn entry_names(archive: &Path) -> Vec<String> {
    let zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut names: Vec<String> = zip.file_names().map(String::from).collect();
    names.sort();
    names
}

fn archived(outcome: ArchiveOutcome) -> pinglog::ArchiveReport {
    match outcome {
        ArchiveOutcome::Archived(report) => report,
        ArchiveOutcome::NothingToArchive => panic!("expected an archive pass"),
    }
}

#[test]
fn test_zero_retention_selects_everything_before_today() {
    let (dir, catalog, archiver) = setup(0);
    for name in ["h-2024-07-08.log", "h-2024-07-09.log", "h-2024-07-10.log", "logs.zip", "README"] {
        fs::write(dir.path().join(name), "x\n").unwrap();
    }

    let cutoff = archiver.cutoff(day(10));
    assert_eq!(catalog.archivable(cutoff).unwrap(), vec!["h-2024-07-08.log", "h-2024-07-09.log"]);
}

#[test]
fn test_nothing_archivable_is_a_noop() {
    let (dir, catalog, archiver) = setup(0);
    fs::write(dir.path().join("h-2024-07-10.log"), "today\n").unwrap();

    assert!(matches!(archiver.run_at(day(10)).unwrap(), ArchiveOutcome::NothingToArchive));
    assert!(!catalog.archive_path().exists());
    assert_eq!(catalog.list().unwrap(), vec!["h-2024-07-10.log"]);
}

#[test]
fn test_pass_archives_and_purges() {
    let (dir, catalog, archiver) = setup(1);
    fs::write(dir.path().join("a-2024-07-07.log"), "a7\n").unwrap();
    fs::write(dir.path().join("b-2024-07-08.log"), "b8\n").unwrap();
    fs::write(dir.path().join("a-2024-07-09.log"), "a9\n").unwrap();
    fs::write(dir.path().join("a-2024-07-10.log"), "a10\n").unwrap();

    let report = archived(archiver.run_at(day(10)).unwrap());
    assert_eq!(report.cutoff, day(9));
    assert_eq!(report.archived, vec!["a-2024-07-07.log", "b-2024-07-08.log"]);
    assert!(report.replaced.is_empty());
    assert!(report.purge_failures.is_empty());

    assert_eq!(catalog.list().unwrap(), vec!["a-2024-07-09.log", "a-2024-07-10.log", "logs.zip"]);
    assert_eq!(entry(&catalog.archive_path(), "a-2024-07-07.log"), "a7\n");
    assert_eq!(entry(&catalog.archive_path(), "b-2024-07-08.log"), "b8\n");
}

#[test]
fn test_archiving_twice_is_idempotent() {
    let (dir, catalog, archiver) = setup(0);
    fs::write(dir.path().join("h-2024-07-08.log"), "old\n").unwrap();
    fs::write(dir.path().join("h-2024-07-10.log"), "today\n").unwrap();

    archived(archiver.run_at(day(10)).unwrap());
    let listing = catalog.list().unwrap();
    let bytes = fs::read(catalog.archive_path()).unwrap();

    assert!(matches!(archiver.run_at(day(10)).unwrap(), ArchiveOutcome::NothingToArchive));
    assert_eq!(catalog.list().unwrap(), listing);
    assert_eq!(fs::read(catalog.archive_path()).unwrap(), bytes);
}

#[test]
fn test_late_write_replaces_archived_entry() {
    let (dir, catalog, archiver) = setup(0);
    let late = dir.path().join("h-2024-07-08.log");
    fs::write(&late, "stale\n").unwrap();
    archived(archiver.run_at(day(10)).unwrap());

    // a late flush recreates the day file after it was archived
    fs::write(&late, "stale\nlate\n").unwrap();
    fs::write(dir.path().join("h-2024-07-09.log"), "nine\n").unwrap();
    let report = archived(archiver.run_at(day(10)).unwrap());

    assert_eq!(report.replaced, vec!["h-2024-07-08.log"]);
    let archive = catalog.archive_path();
    assert_eq!(entry_names(&archive), vec!["h-2024-07-08.log", "h-2024-07-09.log"]);
    assert_eq!(entry(&archive, "h-2024-07-08.log"), "stale\nlate\n");
    assert!(!late.exists());
}

#[test]
fn test_corrupt_archive_keeps_sources() {
    let (dir, catalog, archiver) = setup(0);
    fs::write(catalog.archive_path(), b"not a zip").unwrap();
    fs::write(dir.path().join("h-2024-07-08.log"), "keep me\n").unwrap();

    assert!(matches!(archiver.run_at(day(10)), Err(ArchiveError::Load { .. })));
    assert_eq!(fs::read_to_string(dir.path().join("h-2024-07-08.log")).unwrap(), "keep me\n");
    assert_eq!(fs::read(catalog.archive_path()).unwrap(), b"not a zip");
}

#[tokio::test]
async fn test_purge_announces_catalog() {
    let dir = tempdir().unwrap();
    let catalog = Arc::new(LogCatalog::new(dir.path()));
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let archiver = Arc::new(Archiver::new(catalog, bus, 0));
    fs::write(dir.path().join("h-2024-07-08.log"), "x\n").unwrap();

    // relative to the real clock, 2024 is long past
    let outcome = archiver.clone().run_blocking().await.unwrap();
    assert!(matches!(outcome, ArchiveOutcome::Archived(_)));

    match rx.recv().await.unwrap() {
        PingEvent::FilesChanged(files) => assert_eq!(files, vec!["logs.zip"]),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_failed_persist_leaves_sources_and_archive() {
    let (dir, catalog, archiver) = setup(0);
    fs::write(dir.path().join("h-2024-07-07.log"), "seven\n").unwrap();
    archived(archiver.run_at(day(10)).unwrap());
    let before = fs::read(catalog.archive_path()).unwrap();

    fs::write(dir.path().join("h-2024-07-08.log"), "eight\n").unwrap();
    // the staging file cannot be created over a directory
    fs::create_dir(dir.path().join("logs.zip.tmp")).unwrap();

    assert!(matches!(archiver.run_at(day(10)), Err(ArchiveError::Persist { .. })));
    assert_eq!(fs::read_to_string(dir.path().join("h-2024-07-08.log")).unwrap(), "eight\n");
    assert_eq!(fs::read(catalog.archive_path()).unwrap(), before);
    assert_eq!(catalog.list().unwrap(), vec!["h-2024-07-08.log", "logs.zip"]);
}

#[test]
fn test_archiving_while_flushing_loses_no_line() {
    let (dir, catalog, archiver) = setup(0);
    let writer = DayLogWriter::new(catalog.clone(), EventBus::default()).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 7, 8, 12, 0, 0).unwrap();
    let log_name = "h-2024-07-08.log";

    // every line that left the disk through an archive pass
    let mut archived_lines: HashSet<String> = HashSet::new();
    std::thread::scope(|scope| {
        let writer = &writer;
        let flusher = scope.spawn(move || {
            for i in 0..300i64 {
                let at = start + Duration::milliseconds(i);
                writer.flush("h", vec![ProbeRecord { seq: i as u64, at, latency: Latency::Reachable(7) }]);
            }
        });

        while !flusher.is_finished() {
            if let ArchiveOutcome::Archived(report) = archiver.run_at(day(10)).unwrap() {
                assert!(report.purge_failures.is_empty());
                let text = entry(&catalog.archive_path(), log_name);
                for line in text.lines() {
                    assert!(pinglog::record::parse_line(line).is_some(), "torn line {line:?}");
                    archived_lines.insert(line.to_string());
                }
            }
        }
    });
    if let ArchiveOutcome::Archived(_) = archiver.run_at(day(10)).unwrap() {
        archived_lines.extend(entry(&catalog.archive_path(), log_name).lines().map(String::from));
    }

    assert!(read_log(&dir.path().join(log_name)).unwrap().is_empty());
    assert_eq!(archived_lines.len(), 300);
}
