//! Periodic and on-demand probe rounds
//!
//! Every firing creates one probe in the ledger and pushes it to all
//! sessions. Firings are independent of each other: a manual trigger that
//! lands next to a timer tick simply produces two probes, so clients can see
//! probes faster than the nominal interval.

use log::{debug, warn};
use shared::{to_epoch_millis, Packet, TimeSyncEstimate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::broadcaster::Broadcaster;
use crate::ledger::PingLedger;

pub struct ClockSyncScheduler {
    ledger: Arc<RwLock<PingLedger>>,
    broadcaster: Arc<dyn Broadcaster>,
    interval: Duration,
    /// Simulated downlink delay applied before each probe is pushed
    probe_delay: Duration,
}

impl ClockSyncScheduler {
    pub fn new(
        ledger: Arc<RwLock<PingLedger>>,
        broadcaster: Arc<dyn Broadcaster>,
        interval: Duration,
        probe_delay: Duration,
    ) -> Self {
        Self {
            ledger,
            broadcaster,
            interval,
            probe_delay,
        }
    }

    /// Starts one probe round and returns the probe that was issued
    ///
    /// The probe is in the ledger before it leaves, so a fast client cannot
    /// answer a probe the server does not know yet. With a probe delay the
    /// push happens on a spawned task and this returns immediately.
    pub async fn fire(&self) -> TimeSyncEstimate {
        let probe = {
            let mut ledger = self.ledger.write().await;
            ledger.create_probe()
        };

        let packet = Packet::Ping {
            probe_id: probe.probe_id,
            server_sent_at: to_epoch_millis(probe.server_sent_at),
        };

        if self.probe_delay.is_zero() {
            if let Err(e) = self.broadcaster.push_to_all(packet) {
                warn!("Failed to push probe {}: {}", probe.probe_id, e);
            }
        } else {
            let broadcaster = Arc::clone(&self.broadcaster);
            let delay = self.probe_delay;
            let probe_id = probe.probe_id;
            tokio::spawn(async move {
                sleep(delay).await;
                if let Err(e) = broadcaster.push_to_all(packet) {
                    warn!("Failed to push probe {}: {}", probe_id, e);
                }
            });
        }

        debug!("Issued probe {}", probe.probe_id);
        probe
    }

    /// Fires on every interval tick until the task is dropped or aborted
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.fire().await;
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
