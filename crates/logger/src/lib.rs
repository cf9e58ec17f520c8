//! Tracing subscriber setup for the pinglog binaries.
//!
//! `RUST_LOG` selects the filter (default `info`), `RUST_LOG_FORMAT` selects
//! the output: `json`, `pretty`, or compact lines otherwise.

use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }

    /// Format requested through `RUST_LOG_FORMAT`
    pub fn from_env() -> Self {
        var("RUST_LOG_FORMAT").map(|value| Self::parse(&value)).unwrap_or_default()
    }
}

pub fn init() {
    init_with(LevelFilter::INFO, LogFormat::from_env());
}

/// Install the global subscriber. A second call only logs a warning.
pub fn init_with(level: LevelFilter, format: LogFormat) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    if let Err(error) = tracing_subscriber::registry().with(log_layer).try_init() {
        warn!("Tracing subscriber already installed: {error}");
    }
}
