use anyhow::{Result, anyhow};

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn to_result(&self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(anyhow!(self.error.clone().unwrap_or_else(|| "Validation failed".to_string())))
        }
    }
}

/// Validate a probe target. Hosts end up in log file names and in the
/// `ping` command line, so path separators and option-like names are refused.
pub fn validate_host(host: &str) -> ValidationResult {
    if host.trim().is_empty() {
        return ValidationResult::err("Host cannot be empty");
    }

    if host.chars().any(char::is_whitespace) {
        return ValidationResult::err(format!("Host '{host}' contains whitespace"));
    }

    if host.contains('/') || host.contains('\\') || host.contains("..") {
        return ValidationResult::err(format!("Host '{host}' contains a path separator"));
    }

    if host.starts_with('-') {
        return ValidationResult::err(format!("Host '{host}' cannot start with '-'"));
    }

    if host.len() > 253 {
        return ValidationResult::err("Host name too long (max 253 characters)");
    }

    ValidationResult::ok()
}

/// Validate the configured host list
pub fn validate_hosts(hosts: &[String]) -> ValidationResult {
    if hosts.is_empty() {
        return ValidationResult::err("At least one host must be configured");
    }

    for host in hosts {
        let result = validate_host(host);
        if !result.is_valid {
            return result;
        }
    }

    ValidationResult::ok()
}

/// Validate polling interval
pub fn validate_interval(interval_seconds: u64) -> ValidationResult {
    if interval_seconds == 0 {
        return ValidationResult::err("Interval must be at least 1 second");
    }

    if interval_seconds > 86400 {
        return ValidationResult::err("Interval cannot exceed 24 hours (86400 seconds)");
    }

    ValidationResult::ok()
}

/// Validate the per-host flush threshold
pub fn validate_flush_threshold(threshold: usize) -> ValidationResult {
    if threshold == 0 {
        return ValidationResult::err("Flush threshold must be at least 1");
    }

    ValidationResult::ok()
}

/// Validate an hour of the day (UTC)
pub fn validate_hour(hour: u32) -> ValidationResult {
    if hour > 23 {
        return ValidationResult::err(format!("Hour {hour} is out of range (0-23)"));
    }

    ValidationResult::ok()
}

/// Validate timeout
pub fn validate_timeout(timeout_seconds: u64, interval_seconds: u64) -> ValidationResult {
    if timeout_seconds == 0 {
        return ValidationResult::err("Timeout must be at least 1 second");
    }

    if timeout_seconds > interval_seconds.max(1) * 6 {
        return ValidationResult::err("Timeout cannot exceed six polling intervals");
    }

    ValidationResult::ok()
}
