use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

use crate::validation;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, #[source] source: std::io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config {path}: {source}")]
    ParseFailed { path: path::PathBuf, #[source] source: toml::de::Error },
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub polling: Polling,
    pub storage: Storage,
    pub probe: Probe,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Polling {
    pub interval_seconds: u64,
    pub hosts: Vec<String>,
    /// Poll even when nobody is listening
    pub always_on: bool,
    pub flush_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub log_dir: path::PathBuf,
    /// Whole days kept as plain logs before archiving
    pub uncompressed_log_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Ping,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    pub kind: ProbeKind,
    /// Only used by the tcp prober
    pub port: u16,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    /// UTC hour of the daily archive pass
    pub archive_hour: u32,
    pub sweep_minutes: u64,
    pub history_hours: u32,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            hosts: vec!["8.8.8.8".into()],
            always_on: false,
            flush_threshold: pinglog::DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self { log_dir: "logs".into(), uncompressed_log_days: 0 }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self { kind: ProbeKind::Ping, port: 443, timeout_seconds: 5 }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            archive_hour: 2,
            sweep_minutes: 60,
            history_hours: pinglog::history::DEFAULT_HISTORY_HOURS,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Ping => write!(f, "ping"),
            ProbeKind::Tcp => write!(f, "tcp"),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pinglog/config.toml or
/// $HOME/.config/...)
pub fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pinglog/config.toml"))
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, Error> {
    value.trim().parse().map_err(|_| Error::InvalidEnv { name, value: value.to_string() })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::InvalidEnv { name, value: value.to_string() }),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Polling")?;
        write_1(f, "Hosts", &self.polling.hosts.join(", "))?;
        write_1(f, "Interval (s)", &self.polling.interval_seconds)?;
        write_1(f, "Always On", &self.polling.always_on)?;
        write_1(f, "Flush Threshold", &self.polling.flush_threshold)?;
        write_title_1(f, "Storage")?;
        write_1(f, "Log Directory", &self.storage.log_dir.display())?;
        write_1(f, "Uncompressed Log Days", &self.storage.uncompressed_log_days)?;
        write_title_1(f, "Probe")?;
        write_1(f, "Kind", &self.probe.kind)?;
        write_1(f, "Port", &self.probe.port)?;
        write_1(f, "Timeout (s)", &self.probe.timeout_seconds)?;
        write_title_1(f, "Schedule")?;
        write_1(f, "Archive Hour (UTC)", &self.schedule.archive_hour)?;
        write_1(f, "Sweep (min)", &self.schedule.sweep_minutes)?;
        write_1(f, "History (h)", &self.schedule.history_hours)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pinglog/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())
                .map_err(|source| Error::ParseFailed { path: config_path, source })
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Load from file, apply environment overrides and validate
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let mut config = Self::from_config(optional_path)?;
        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        std::fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Override file values with `HOSTS`, `POLL_RATE`, `ALWAYS_ON`,
    /// `UNCOMPRESSED_LOG_DAYS`, `FLUSH_THRESHOLD` and `LOG_DIR`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(hosts) = lookup("HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(String::from)
                .collect();
            if hosts.is_empty() {
                return Err(Error::InvalidEnv { name: "HOSTS", value: String::new() });
            }
            self.polling.hosts = hosts;
        }
        if let Some(value) = lookup("POLL_RATE") {
            self.polling.interval_seconds = parse_env("POLL_RATE", &value)?;
        }
        if let Some(value) = lookup("ALWAYS_ON") {
            self.polling.always_on = parse_flag("ALWAYS_ON", &value)?;
        }
        if let Some(value) = lookup("UNCOMPRESSED_LOG_DAYS") {
            self.storage.uncompressed_log_days = parse_env("UNCOMPRESSED_LOG_DAYS", &value)?;
        }
        if let Some(value) = lookup("FLUSH_THRESHOLD") {
            self.polling.flush_threshold = parse_env("FLUSH_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("LOG_DIR") {
            self.storage.log_dir = value.into();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        [
            validation::validate_hosts(&self.polling.hosts),
            validation::validate_interval(self.polling.interval_seconds),
            validation::validate_flush_threshold(self.polling.flush_threshold),
            validation::validate_timeout(self.probe.timeout_seconds, self.polling.interval_seconds),
            validation::validate_hour(self.schedule.archive_hour),
        ]
        .iter()
        .try_for_each(|result| result.to_result())
        .map_err(|e| Error::Invalid(e.to_string()))?;

        if self.schedule.sweep_minutes == 0 {
            return Err(Error::Invalid("Sweep interval must be at least 1 minute".into()));
        }
        Ok(())
    }
}
