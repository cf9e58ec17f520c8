use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{ProbeOutcome, Prober};

/// ICMP echo through the system `ping` binary, which avoids needing raw
/// socket privileges in this process
pub struct PingProber {
    timeout_duration: Duration,
}

impl PingProber {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }

    fn command(&self, host: &str) -> Command {
        let secs = self.timeout_duration.as_secs().max(1).to_string();
        let mut command = Command::new("ping");
        if cfg!(windows) {
            let millis = self.timeout_duration.as_millis().max(1).to_string();
            command.args(["-n", "1", "-w", millis.as_str(), host]);
        } else if cfg!(target_os = "macos") {
            command.args(["-c", "1", "-t", secs.as_str(), host]);
        } else {
            command.args(["-c", "1", "-W", secs.as_str(), host]);
        }
        command.kill_on_drop(true);
        command
    }

    async fn measure(&self, host: &str) -> Result<f64> {
        if host.starts_with('-') {
            bail!("refusing to ping option-like host {host:?}");
        }

        // leave ping its own timeout plus a grace second before giving up on it
        let deadline = self.timeout_duration + Duration::from_secs(1);
        let output = timeout(deadline, self.command(host).output())
            .await
            .map_err(|_| anyhow!("ping timed out"))?
            .context("failed to run ping")?;

        if !output.status.success() {
            bail!("ping exited with {}", output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_time(&stdout).ok_or_else(|| anyhow!("no round-trip time in ping output"))
    }
}

#[async_trait::async_trait]
impl Prober for PingProber {
    async fn probe(&self, host: &str) -> ProbeOutcome {
        match self.measure(host).await {
            Ok(ms) => ProbeOutcome::reachable(ms),
            Err(e) => {
                debug!(host = %host, "Probe failed: {:#}", e);
                ProbeOutcome::unreachable()
            }
        }
    }
}

/// Extract the round-trip time in ms from `ping` output (`time=12.3 ms`,
/// `time=12ms` or `time<1ms`)
pub fn parse_ping_time(output: &str) -> Option<f64> {
    let start = output.find("time=").or_else(|| output.find("time<"))? + "time=".len();
    let digits: String = output[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}
