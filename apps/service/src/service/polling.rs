use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{trace, warn};

use super::PingService;

/// Polling loop of one host together with the probes it has in flight
pub(super) struct HostTimer {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl HostTimer {
    /// Stop ticking and cancel in-flight probes. Once this returns no probe
    /// of this timer can record anything.
    pub(super) async fn halt(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("Polling task ended abnormally: {}", e);
        }
    }
}

/// Probe `host` every `period` until halted.
///
/// Each tick spawns its own probe so a slow host never delays the next tick.
/// The first probe fires one period after start.
pub(super) fn spawn_host_timer(service: PingService, host: String, period: Duration) -> HostTimer {
    let (stop, mut stopped) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probes = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = timer.tick() => {
                    trace!(host = %host, in_flight = probes.len(), "Probing");
                    let service = service.clone();
                    let host = host.clone();
                    probes.spawn(async move {
                        service.probe_once(&host).await;
                    });
                }
                // reap finished probes
                Some(_) = probes.join_next(), if !probes.is_empty() => {}
            }
        }

        probes.shutdown().await;
    });

    HostTimer { stop, task }
}
