//! Runtime orchestration of the probe pipeline.
//!
//! A [`PingService`] owns the cache, the history window, the log writer and
//! the archiver, and decides when polling runs. Polling is gated on
//! listeners: the first `connect` starts the per-host timers, the last
//! `disconnect` stops them and flushes whatever is still buffered. With
//! `always_on` a baseline listener keeps polling running permanently.

mod maintenance;
mod polling;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pinglog::history::HistoryPoint;
use pinglog::{
    ArchiveOutcome, Archiver, CacheError, DayLogWriter, EventBus, FlushReport, HostStats, Latency,
    LogCatalog, PingEvent, Prober, RecentHistory, Recorded, ResultCache,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Everything a newly connected listener needs to render its initial view
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub hosts: Vec<String>,
    pub files: Vec<String>,
    pub history: Vec<(String, Vec<HistoryPoint>)>,
    pub stats: Vec<HostStats>,
}

#[derive(Clone)]
pub struct PingService {
    inner: Arc<Inner>,
}

struct Inner {
    interval: Duration,
    archive_hour: u32,
    sweep_every: Duration,
    /// Listener count that does not count as an observer
    baseline: usize,
    cache: ResultCache,
    history: RecentHistory,
    catalog: Arc<LogCatalog>,
    writer: DayLogWriter,
    archiver: Arc<Archiver>,
    bus: EventBus,
    prober: Arc<dyn Prober>,
    listeners: Mutex<usize>,
    timers: Mutex<Vec<polling::HostTimer>>,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

impl PingService {
    pub fn new(config: &Config, prober: Arc<dyn Prober>) -> Result<Self> {
        let bus = EventBus::default();
        let catalog = Arc::new(LogCatalog::new(&config.storage.log_dir));
        let writer = DayLogWriter::new(catalog.clone(), bus.clone())?;
        let cache = ResultCache::new(config.polling.hosts.iter(), config.polling.flush_threshold);
        let history = RecentHistory::new(cache.hosts(), config.schedule.history_hours);
        let archiver = Arc::new(Archiver::new(
            catalog.clone(),
            bus.clone(),
            config.storage.uncompressed_log_days,
        ));
        let baseline = usize::from(config.polling.always_on);

        Ok(Self {
            inner: Arc::new(Inner {
                interval: Duration::from_secs(config.polling.interval_seconds),
                archive_hour: config.schedule.archive_hour,
                sweep_every: Duration::from_secs(config.schedule.sweep_minutes * 60),
                baseline,
                cache,
                history,
                catalog,
                writer,
                archiver,
                bus,
                prober,
                listeners: Mutex::new(0),
                timers: Mutex::new(Vec::new()),
                maintenance: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn hosts(&self) -> &[String] {
        self.inner.cache.hosts()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn catalog(&self) -> &Arc<LogCatalog> {
        &self.inner.catalog
    }

    pub fn is_polling(&self) -> bool {
        !self.inner.timers.lock().is_empty()
    }

    pub fn listeners(&self) -> usize {
        self.inner.listeners.lock().saturating_sub(self.inner.baseline)
    }

    /// Rebuild history, start maintenance and, with `always_on`, polling
    pub fn start(&self) -> Result<()> {
        info!(
            retention_days = self.inner.archiver.retention_days(),
            history_hours = self.inner.history.window().num_hours(),
            "Starting maintenance"
        );
        let today = Utc::now().date_naive();
        if let Err(e) = self.inner.history.rehydrate(&self.inner.catalog, today) {
            warn!("Failed to load today's probe history: {}", e);
        }

        {
            let mut maintenance = self.inner.maintenance.lock();
            if maintenance.is_empty() {
                maintenance.push(maintenance::spawn_archive_schedule(self.clone(), self.inner.archive_hour));
                maintenance.push(maintenance::spawn_sweep(self.clone(), self.inner.sweep_every));
                maintenance.push(maintenance::spawn_rollover_flush(self.clone()));
            }
        }

        if self.inner.baseline > 0 {
            info!("Always-on polling enabled");
            self.connect();
        }

        self.inner.bus.publish(PingEvent::HostsChanged(self.hosts().to_vec()));
        Ok(())
    }

    /// Register a listener, starting polling if it is the first one
    pub fn connect(&self) -> Welcome {
        {
            let mut listeners = self.inner.listeners.lock();
            *listeners += 1;
            debug!(listeners = *listeners, "Listener connected");
            if *listeners == 1 {
                self.start_polling();
            }
        }

        let files = self.inner.catalog.list().unwrap_or_else(|e| {
            warn!("Failed to list log directory: {}", e);
            Vec::new()
        });

        Welcome {
            hosts: self.hosts().to_vec(),
            files,
            history: self.inner.history.snapshot_all(),
            stats: self.stats(),
        }
    }

    /// Unregister a listener, stopping polling and flushing once none remain
    pub async fn disconnect(&self) {
        let timers = {
            let mut listeners = self.inner.listeners.lock();
            if *listeners <= self.inner.baseline {
                warn!("Disconnect without a matching connect");
                return;
            }
            *listeners -= 1;
            debug!(listeners = *listeners, "Listener disconnected");
            if *listeners > 0 {
                return;
            }
            self.stop_polling()
        };

        if !timers.is_empty() {
            halt(timers).await;
            self.flush_all().await;
        }
    }

    fn start_polling(&self) {
        let mut timers = self.inner.timers.lock();
        if !timers.is_empty() {
            return;
        }
        info!(hosts = self.hosts().len(), interval = ?self.inner.interval, "Starting polling");
        timers.extend(
            self.hosts()
                .iter()
                .map(|host| polling::spawn_host_timer(self.clone(), host.clone(), self.inner.interval)),
        );
    }

    /// Detach the running timers so no new timer can join them. They keep
    /// going until passed to [`halt`].
    fn stop_polling(&self) -> Vec<polling::HostTimer> {
        let timers = std::mem::take(&mut *self.inner.timers.lock());
        if !timers.is_empty() {
            info!("Stopping polling");
        }
        timers
    }

    /// Probe a host once and record the outcome
    pub async fn probe_once(&self, host: &str) {
        let outcome = self.inner.prober.probe(host).await;
        if let Err(e) = self.record(host, Utc::now(), outcome.latency()) {
            error!("Failed to record probe: {}", e);
        }
    }

    /// Record a probe result, publishing it to observers and flushing the
    /// host once its buffer passes the threshold
    pub fn record(&self, host: &str, at: DateTime<Utc>, latency: Latency) -> Result<Recorded, CacheError> {
        let recorded = self.inner.cache.record(host, at, latency)?;
        self.inner.history.push(host, at, latency);

        if self.has_observers() {
            self.inner.bus.publish(PingEvent::ProbeRecorded { host: host.to_string(), time: at, ping: latency });
        }

        if recorded.needs_flush {
            debug!(
                host,
                buffered = recorded.len,
                threshold = self.inner.cache.threshold(),
                "Flush threshold reached"
            );
            self.schedule_flush(host);
        }
        Ok(recorded)
    }

    fn has_observers(&self) -> bool {
        *self.inner.listeners.lock() > self.inner.baseline
    }

    fn schedule_flush(&self, host: &str) {
        let service = self.clone();
        let host = host.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || service.flush_host_blocking(&host));
            }
            Err(_) => service.flush_host_blocking(&host),
        }
    }

    fn flush_host_blocking(&self, host: &str) {
        match self.inner.writer.flush_host(&self.inner.cache, host) {
            Ok(report) => log_flush(host, &report),
            Err(e) => error!("Failed to flush {}: {}", host, e),
        }
    }

    /// Flush every host's buffer, returning the number of records written
    pub async fn flush_all(&self) -> usize {
        let service = self.clone();
        let reports = match tokio::task::spawn_blocking(move || {
            service.inner.writer.flush_all(&service.inner.cache)
        })
        .await
        {
            Ok(reports) => reports,
            Err(e) => {
                error!("Flush task failed: {}", e);
                return 0;
            }
        };

        let mut written = 0;
        for (host, report) in &reports {
            log_flush(host, report);
            written += report.records_written();
        }
        written
    }

    /// Statistics over the buffered window of every host
    pub fn stats(&self) -> Vec<HostStats> {
        pinglog::stats::aggregate(&self.inner.cache)
    }

    pub fn publish_stats(&self) {
        let stats = self.stats();
        for host in &stats {
            debug!("{host}");
        }
        self.inner.bus.publish_stats(stats);
    }

    /// Prune history past its window and refresh observers' statistics
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let removed = self.inner.history.prune(now);
        if self.has_observers() {
            self.publish_stats();
        }
        removed
    }

    /// Run an archive pass now
    pub async fn archive(&self) -> Result<ArchiveOutcome> {
        let outcome = self.inner.archiver.clone().run_blocking().await?;
        match &outcome {
            ArchiveOutcome::NothingToArchive => info!("No logs due for archiving"),
            ArchiveOutcome::Archived(report) => {
                info!(
                    archived = report.archived.len(),
                    replaced = report.replaced.len(),
                    "Archive pass completed"
                );
                for failure in &report.purge_failures {
                    warn!(file = %failure.file, "Archived log left on disk: {}", failure.error);
                }
            }
        }
        Ok(outcome)
    }

    /// Stop every task and flush what is left
    pub async fn shutdown(&self) {
        info!(listeners = self.listeners(), polling = self.is_polling(), "Stopping service");
        for task in std::mem::take(&mut *self.inner.maintenance.lock()) {
            task.abort();
        }
        let timers = {
            let mut listeners = self.inner.listeners.lock();
            *listeners = 0;
            self.stop_polling()
        };
        halt(timers).await;
        let written = self.flush_all().await;
        info!(records = written, "Shutdown flush complete");
    }
}

/// Stop every timer and wait until none of their probes can still record
async fn halt(timers: Vec<polling::HostTimer>) {
    for timer in timers {
        timer.halt().await;
    }
}

fn log_flush(host: &str, report: &FlushReport) {
    if report.is_empty() {
        return;
    }
    info!(host, records = report.records_written(), files = report.written.len(), "Flushed probe results");
    if report.records_dropped() > 0 {
        error!(host, dropped = report.records_dropped(), "Probe results lost during flush");
    }
}
