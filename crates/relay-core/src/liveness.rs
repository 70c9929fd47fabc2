//! Dead-peer detection.
//!
//! One timer sweeps the whole registry. On each tick a connection that has
//! not acknowledged the previous probe is terminated; every other connection
//! has its flag cleared and receives a new probe. A silent peer is therefore
//! evicted on the second tick after its last acknowledgment.

use crate::directory::ChannelDirectory;
use crate::registry::Outbound;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default interval between sweeps.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that were sent a probe.
    pub probed: usize,
    /// Connections evicted for missing the previous probe.
    pub terminated: usize,
}

/// Periodically probes every connection and evicts unresponsive ones.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    directory: Arc<ChannelDirectory>,
    interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor over a directory.
    #[must_use]
    pub fn new(directory: Arc<ChannelDirectory>, interval: Duration) -> Self {
        Self {
            directory,
            interval,
        }
    }

    /// Run a single sweep over all registered connections.
    pub fn sweep(&self) -> SweepReport {
        let registry = self.directory.registry();
        let mut report = SweepReport::default();

        for id in registry.ids() {
            match registry.mark_probe_sent(id) {
                Some(true) => {
                    registry.send(id, Outbound::Ping);
                    report.probed += 1;
                }
                Some(false) => {
                    warn!(connection = %id, "No pong since last probe, terminating");
                    registry.send(id, Outbound::Terminate);
                    self.directory.remove_connection(id);
                    report.terminated += 1;
                }
                // Disconnected while we were sweeping.
                None => {}
            }
        }

        debug!(
            probed = report.probed,
            terminated = report.terminated,
            "Liveness sweep"
        );
        report
    }

    /// Run sweeps on a timer until `shutdown` flips to `true` or its sender
    /// is dropped. `on_sweep` observes every report.
    pub fn spawn<F>(self, mut shutdown: watch::Receiver<bool>, on_sweep: F) -> JoinHandle<()>
    where
        F: Fn(&SweepReport) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(interval_ms = self.interval.as_millis() as u64, "Liveness monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.sweep();
                        on_sweep(&report);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Liveness monitor stopped");
        })
    }
}
