//! Probe records and the on-disk log line format.
//!
//! One line per probe: `<RFC 3339 UTC timestamp, millisecond precision> | <ms>`,
//! where an unreachable probe is written as `0`. Files are named
//! `<host>-<YYYY-MM-DD>.log` after the UTC day of the records they hold.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Separator between the timestamp and the latency on a log line
pub const FIELD_SEPARATOR: &str = " | ";

/// Extension of every day log file
pub const LOG_EXTENSION: &str = ".log";

const DAY_FORMAT: &str = "%Y-%m-%d";
const DAY_LEN: usize = 10;

/// Round-trip latency of a single probe.
///
/// Serialized as a bare number of milliseconds, `0` meaning unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Latency {
    /// Host answered; always at least 1 ms so it never reads back as unreachable
    Reachable(u32),
    /// Host did not answer
    Unreachable,
}

impl Latency {
    /// Build a latency from a fractional millisecond measurement
    pub fn from_millis_f64(ms: f64) -> Self {
        if !ms.is_finite() || ms < 0.0 {
            return Latency::Unreachable;
        }
        Latency::Reachable((ms.round() as u32).max(1))
    }

    /// Milliseconds, or `0` when unreachable
    pub fn as_millis(self) -> u32 {
        match self {
            Latency::Reachable(ms) => ms,
            Latency::Unreachable => 0,
        }
    }

    /// Milliseconds if the host answered
    pub fn millis(self) -> Option<u32> {
        match self {
            Latency::Reachable(ms) => Some(ms),
            Latency::Unreachable => None,
        }
    }

    pub fn is_reachable(self) -> bool {
        matches!(self, Latency::Reachable(_))
    }
}

impl From<u32> for Latency {
    fn from(ms: u32) -> Self {
        if ms == 0 { Latency::Unreachable } else { Latency::Reachable(ms) }
    }
}

impl From<Latency> for u32 {
    fn from(latency: Latency) -> Self {
        latency.as_millis()
    }
}

impl std::fmt::Display for Latency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Latency::Reachable(ms) => write!(f, "{ms}ms"),
            Latency::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// A single probe result held in the result cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// Process-wide sequence number, distinguishes probes within the same millisecond
    pub seq: u64,

    /// Wall-clock instant of the probe
    pub at: DateTime<Utc>,

    /// Measured latency
    pub latency: Latency,
}

impl ProbeRecord {
    /// UTC day this record belongs to
    pub fn day(&self) -> NaiveDate {
        self.at.date_naive()
    }

    /// Ordering key used before a flush
    pub fn sort_key(&self) -> (DateTime<Utc>, u64) {
        (self.at, self.seq)
    }
}

/// Render one log line, newline included
pub fn format_line(at: DateTime<Utc>, latency: Latency) -> String {
    format!(
        "{}{}{}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        FIELD_SEPARATOR,
        latency.as_millis()
    )
}

/// Parse one log line. Blank or malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<(DateTime<Utc>, Latency)> {
    let (timestamp, ms) = line.trim().split_once(FIELD_SEPARATOR.trim())?;
    let at = DateTime::parse_from_rfc3339(timestamp.trim()).ok()?.with_timezone(&Utc);
    let ms: u32 = ms.trim().parse().ok()?;
    Some((at, Latency::from(ms)))
}

/// `<host>-<YYYY-MM-DD>.log`
pub fn log_file_name(host: &str, day: NaiveDate) -> String {
    format!("{host}-{}{LOG_EXTENSION}", day.format(DAY_FORMAT))
}

/// Day embedded in a log file name, if the name follows the log naming scheme
pub fn parse_log_day(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_suffix(LOG_EXTENSION)?;
    let split = stem.len().checked_sub(DAY_LEN)?;
    if !stem.is_char_boundary(split) {
        return None;
    }
    let (prefix, day) = stem.split_at(split);
    // at least one host character followed by the dash
    if prefix.len() < 2 || !prefix.ends_with('-') {
        return None;
    }
    NaiveDate::parse_from_str(day, DAY_FORMAT).ok()
}
