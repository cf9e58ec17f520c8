use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::time::timeout;
use tracing::debug;

use super::{ProbeOutcome, Prober};

/// Measures TCP connect time to a fixed port
pub struct TcpProber {
    port: u16,
    timeout_duration: Duration,
}

impl TcpProber {
    pub fn new(port: u16, timeout_duration: Duration) -> Self {
        Self { port, timeout_duration }
    }

    fn target(&self, host: &str) -> String {
        if host.contains(':') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        }
    }

    async fn measure(&self, host: &str) -> Result<f64> {
        let start = Instant::now();

        timeout(self.timeout_duration, tokio::net::TcpStream::connect(self.target(host)))
            .await
            .map_err(|_| anyhow!("TCP connection timeout"))?
            .map_err(|e| anyhow!("TCP connection failed: {}", e))?;

        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}

#[async_trait::async_trait]
impl Prober for TcpProber {
    async fn probe(&self, host: &str) -> ProbeOutcome {
        match self.measure(host).await {
            Ok(ms) => ProbeOutcome::reachable(ms),
            Err(e) => {
                debug!(host = %host, "Probe failed: {}", e);
                ProbeOutcome::unreachable()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_target_brackets_ipv6() {
        let prober = TcpProber::new(443, Duration::from_secs(1));
        assert_eq!(prober.target("1.1.1.1"), "1.1.1.1:443");
        assert_eq!(prober.target("::1"), "[::1]:443");
    }

    #[tokio::test]
    async fn test_probe_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = TcpProber::new(port, Duration::from_secs(2));
        let outcome = prober.probe("127.0.0.1").await;
        assert!(outcome.reachable);
        assert!(outcome.latency().is_reachable());
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = TcpProber::new(port, Duration::from_secs(2));
        assert_eq!(prober.probe("127.0.0.1").await, ProbeOutcome::unreachable());
    }
}
