//! Background upkeep: the daily archive pass, the periodic history sweep and
//! the flush at UTC midnight.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use super::PingService;

/// Time from `now` until the next `hour`:00 UTC, strictly in the future
pub fn duration_until_hour(now: DateTime<Utc>, hour: u32) -> Duration {
    let today = now.date_naive();
    let at = |day: NaiveDate| day.and_hms_opt(hour, 0, 0).map(|time| time.and_utc());

    let next = match at(today) {
        Some(time) if time > now => time,
        _ => today.succ_opt().and_then(|day| at(day)).unwrap_or(now + TimeDelta::days(1)),
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Archive stale logs once a day at `hour` UTC
pub(super) fn spawn_archive_schedule(service: PingService, hour: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = duration_until_hour(Utc::now(), hour);
            debug!(secs = wait.as_secs(), "Next archive pass scheduled");
            tokio::time::sleep(wait).await;

            info!("Starting scheduled archive pass");
            if let Err(e) = service.archive().await {
                warn!("Scheduled archive pass failed: {:#}", e);
            }
        }
    })
}

/// Prune history and refresh statistics every `every`
pub(super) fn spawn_sweep(service: PingService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + every, every);

        loop {
            interval.tick().await;
            let removed = service.sweep(Utc::now());
            debug!(removed, "Periodic sweep completed");
        }
    })
}

/// Flush every buffer when the UTC day rolls over
pub(super) fn spawn_rollover_flush(service: PingService) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(duration_until_hour(Utc::now(), 0)).await;
            let written = service.flush_all().await;
            info!(records = written, "Day rollover flush");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 31, h, m, s).unwrap()
    }

    #[test]
    fn test_later_today() {
        assert_eq!(duration_until_hour(at(1, 30, 0), 2), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_exactly_on_the_hour_waits_a_day() {
        assert_eq!(duration_until_hour(at(2, 0, 0), 2), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_midnight_across_year_end() {
        assert_eq!(duration_until_hour(at(23, 0, 0), 0), Duration::from_secs(3600));
    }

    #[test]
    fn test_out_of_range_hour_falls_back_to_a_day() {
        assert_eq!(duration_until_hour(at(5, 0, 0), 24), Duration::from_secs(24 * 3600));
    }
}
