//! pinglog - probe result retention for host latency monitoring
//!
//! Probe results are buffered per host in memory, appended to
//! day-partitioned text logs once a host's buffer grows past a threshold or
//! on an explicit flush, and stale day logs are periodically compacted into
//! a single zip archive.

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod events;
pub mod history;
pub mod probe;
pub mod record;
pub mod stats;
pub mod writer;

// Re-export main types
pub use archive::{ArchiveContainer, ArchiveError, ArchiveOutcome, ArchiveReport, Archiver};
pub use cache::{CacheError, Recorded, ResultCache};
pub use catalog::LogCatalog;
pub use events::{EventBus, PingEvent};
pub use history::{HistoryPoint, RecentHistory};
pub use probe::{PingProber, ProbeOutcome, Prober, TcpProber};
pub use record::{Latency, ProbeRecord};
pub use stats::HostStats;
pub use writer::{DayLogWriter, FlushReport, LogError};

/// File name of the rolling archive inside the log directory
pub const ARCHIVE_FILE_NAME: &str = "logs.zip";

/// Buffered probes per host before a flush is triggered
pub const DEFAULT_FLUSH_THRESHOLD: usize = 100;
