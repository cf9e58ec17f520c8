//! Cache and day-log flush behaviour

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use pinglog::record::parse_log_day;
use pinglog::writer::read_log;
use pinglog::{DayLogWriter, EventBus, Latency, LogCatalog, PingEvent, ProbeRecord, ResultCache};
use tempfile::tempdir;

#[test]
fn test_drained_batches_cover_every_record() {
    let cache = ResultCache::new(["8.8.8.8"], 10);
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let mut inserted = HashSet::new();
    let mut drained = HashSet::new();
    for i in 0..57u32 {
        let recorded = cache
            .record("8.8.8.8", start + Duration::seconds(i64::from(i) * 5), Latency::from(i % 7))
            .unwrap();
        inserted.insert(recorded.seq);

        if recorded.needs_flush {
            drained.extend(cache.drain("8.8.8.8").unwrap().into_iter().map(|r| r.seq));
            assert!(cache.snapshot("8.8.8.8").unwrap().is_empty());
        }
    }
    drained.extend(cache.drain("8.8.8.8").unwrap().into_iter().map(|r| r.seq));

    assert!(cache.snapshot("8.8.8.8").unwrap().is_empty());
    assert_eq!(drained, inserted);
}

#[test]
fn test_concurrent_records_are_not_lost() {
    let cache = Arc::new(ResultCache::new(["a", "b"], 1_000_000));
    let now = Utc::now();

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let cache = cache.clone();
            scope.spawn(move || {
                let host = if worker % 2 == 0 { "a" } else { "b" };
                for _ in 0..250 {
                    cache.record(host, now, Latency::Reachable(1)).unwrap();
                }
            });
        }
    });

    assert_eq!(cache.len("a"), 1000);
    assert_eq!(cache.len("b"), 1000);
}

#[test]
fn test_batch_spanning_midnight_writes_two_files() {
    let dir = tempdir().unwrap();
    let catalog = Arc::new(LogCatalog::new(dir.path()));
    let writer = DayLogWriter::new(catalog.clone(), EventBus::default()).unwrap();
    let cache = ResultCache::new(["1.1.1.1"], 100);

    let before = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 55).unwrap();
    for i in 0..4 {
        cache.record("1.1.1.1", before + Duration::seconds(i * 5), Latency::Reachable(10)).unwrap();
    }

    let report = writer.flush_host(&cache, "1.1.1.1").unwrap();
    assert_eq!(report.written.len(), 2);

    let files = catalog.list().unwrap();
    assert_eq!(files, vec!["1.1.1.1-2024-06-01.log", "1.1.1.1-2024-06-02.log"]);

    for file in files {
        let day = parse_log_day(&file).unwrap();
        let records = read_log(&dir.path().join(&file)).unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|(at, _)| at.date_naive() == day));
    }
    assert_eq!(read_log(&dir.path().join("1.1.1.1-2024-06-01.log")).unwrap().len(), 1);
    assert_eq!(read_log(&dir.path().join("1.1.1.1-2024-06-02.log")).unwrap().len(), 3);
}

#[test]
fn test_unreachable_probes_are_persisted_as_zero() {
    let dir = tempdir().unwrap();
    let writer = DayLogWriter::new(Arc::new(LogCatalog::new(dir.path())), EventBus::default()).unwrap();
    let cache = ResultCache::new(["h"], 100);
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    cache.record("h", at, Latency::Unreachable).unwrap();
    writer.flush_host(&cache, "h").unwrap();

    let text = fs::read_to_string(dir.path().join("h-2024-06-01.log")).unwrap();
    assert_eq!(text, "2024-06-01T08:00:00.000Z | 0\n");
}

#[test]
fn test_flush_all_covers_every_host() {
    let dir = tempdir().unwrap();
    let writer = DayLogWriter::new(Arc::new(LogCatalog::new(dir.path())), EventBus::default()).unwrap();
    let cache = ResultCache::new(["a", "b", "c"], 100);
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    cache.record("a", at, Latency::Reachable(3)).unwrap();
    cache.record("c", at, Latency::Reachable(4)).unwrap();

    let reports = writer.flush_all(&cache);
    let hosts: Vec<_> = reports.iter().map(|(host, _)| host.as_str()).collect();
    assert_eq!(hosts, vec!["a", "c"]);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_new_file_announces_catalog() {
    let dir = tempdir().unwrap();
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let writer = DayLogWriter::new(Arc::new(LogCatalog::new(dir.path())), bus).unwrap();
    let cache = ResultCache::new(["h"], 100);
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    cache.record("h", at, Latency::Reachable(3)).unwrap();
    writer.flush_host(&cache, "h").unwrap();

    match rx.recv().await.unwrap() {
        PingEvent::FilesChanged(files) => assert_eq!(files, vec!["h-2024-06-01.log"]),
        other => panic!("unexpected event: {other:?}"),
    }

    // appending to an existing file is silent
    cache.record("h", at, Latency::Reachable(4)).unwrap();
    writer.flush_host(&cache, "h").unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_threshold_and_full_flushes_write_each_record_once() {
    let dir = tempdir().unwrap();
    let writer = DayLogWriter::new(Arc::new(LogCatalog::new(dir.path())), EventBus::default()).unwrap();
    let cache = ResultCache::new(["h"], 3);
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4i64 {
            let (cache, writer) = (&cache, &writer);
            scope.spawn(move || {
                for i in 0..1000i64 {
                    // distinct timestamp per record so lines can be told apart
                    let at = start + Duration::milliseconds(worker * 1000 + i);
                    let recorded = cache.record("h", at, Latency::Reachable(5)).unwrap();
                    if recorded.needs_flush {
                        writer.flush_host(cache, "h").unwrap();
                    }
                    if i % 97 == 0 {
                        writer.flush_all(cache);
                    }
                }
            });
        }
    });
    writer.flush_all(&cache);

    let text = fs::read_to_string(dir.path().join("h-2024-06-01.log")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    let unique: HashSet<&str> = lines.iter().copied().collect();
    assert_eq!(lines.len(), 4000);
    assert_eq!(unique.len(), 4000);
    assert!(cache.is_empty());
}

#[test]
fn test_flushed_batches_never_interleave_lines() {
    let dir = tempdir().unwrap();
    let writer = DayLogWriter::new(Arc::new(LogCatalog::new(dir.path())), EventBus::default()).unwrap();
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let writer = &writer;
            scope.spawn(move || {
                for i in 0..200u64 {
                    let batch = (0..5)
                        .map(|j| ProbeRecord {
                            seq: worker * 10_000 + i * 10 + j,
                            at,
                            latency: Latency::Reachable(1 + worker as u32),
                        })
                        .collect();
                    writer.flush("h", batch);
                }
            });
        }
    });

    let records = read_log(&dir.path().join("h-2024-06-01.log")).unwrap();
    let text = fs::read_to_string(dir.path().join("h-2024-06-01.log")).unwrap();
    assert_eq!(records.len(), 4000);
    assert_eq!(text.lines().count(), 4000);
}
