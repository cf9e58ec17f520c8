//! Summary statistics over the buffered probe window.
//!
//! Only reachable probes contribute to `average` and `std_dev`. When a window
//! holds no reachable probe at all both are `None`, serialized as `null`,
//! instead of the NaN a plain division would produce.

use serde::{Deserialize, Serialize};

use crate::cache::ResultCache;
use crate::record::Latency;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub host: String,
    /// Mean latency in ms over reachable probes
    pub average: Option<f64>,
    /// Population standard deviation over reachable probes
    pub std_dev: Option<f64>,
    /// Probes at or above 100 ms
    pub over_hundred: usize,
    /// Probes at or above 1000 ms
    pub over_thousand: usize,
    /// Unreachable probes
    pub zeroes_count: usize,
    /// All probes in the window
    pub samples: usize,
}

impl HostStats {
    pub fn compute<I>(host: impl Into<String>, latencies: I) -> Self
    where
        I: IntoIterator<Item = Latency>,
    {
        let mut reachable = Vec::new();
        let mut zeroes_count = 0;
        for latency in latencies {
            match latency.millis() {
                Some(ms) => reachable.push(f64::from(ms)),
                None => zeroes_count += 1,
            }
        }

        let over_hundred = reachable.iter().filter(|&&ms| ms >= 100.0).count();
        let over_thousand = reachable.iter().filter(|&&ms| ms >= 1000.0).count();

        let (average, std_dev) = if reachable.is_empty() {
            (None, None)
        } else {
            let n = reachable.len() as f64;
            let mean = reachable.iter().sum::<f64>() / n;
            let variance = reachable.iter().map(|ms| (ms - mean).powi(2)).sum::<f64>() / n;
            (Some(mean), Some(variance.sqrt()))
        };

        Self {
            host: host.into(),
            average,
            std_dev,
            over_hundred,
            over_thousand,
            zeroes_count,
            samples: reachable.len() + zeroes_count,
        }
    }

    /// At least one reachable probe in the window
    pub fn has_data(&self) -> bool {
        self.average.is_some()
    }
}

impl std::fmt::Display for HostStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} n={}", self.host, self.samples)?;
        match (self.average, self.std_dev) {
            (Some(avg), Some(sd)) => write!(f, " avg={avg:.1}ms sd={sd:.1}ms")?,
            _ => write!(f, " avg=n/a sd=n/a")?,
        }
        write!(
            f,
            " >=100ms={} >=1000ms={} lost={}",
            self.over_hundred, self.over_thousand, self.zeroes_count
        )
    }
}

/// Statistics for every host over its current cache snapshot
pub fn aggregate(cache: &ResultCache) -> Vec<HostStats> {
    cache
        .hosts()
        .iter()
        .map(|host| {
            let window = cache.snapshot(host).unwrap_or_default();
            HostStats::compute(host.as_str(), window.into_iter().map(|record| record.latency))
        })
        .collect()
}
