//! Probe sources.
//!
//! A probe never fails from the caller's point of view: anything that goes
//! wrong while measuring is reported as an unreachable outcome.

mod ping;
mod tcp;

pub use ping::{parse_ping_time, PingProber};
pub use tcp::TcpProber;

use serde::{Deserialize, Serialize};

use crate::record::Latency;

/// Result of probing one host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub latency_ms: f64,
}

impl ProbeOutcome {
    pub fn reachable(latency_ms: f64) -> Self {
        Self { reachable: true, latency_ms }
    }

    pub fn unreachable() -> Self {
        Self { reachable: false, latency_ms: 0.0 }
    }

    /// Latency as recorded in the cache and the logs
    pub fn latency(&self) -> Latency {
        if self.reachable { Latency::from_millis_f64(self.latency_ms) } else { Latency::Unreachable }
    }
}

/// Measures reachability and round-trip time of a host
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, host: &str) -> ProbeOutcome;
}
