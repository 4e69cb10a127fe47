//! Offset-aware command relay
//!
//! A command arrives stamped with the sender's clock. The relay translates
//! that stamp to the server's clock using the sender's best offset, rejects
//! the command if it is already too old, and otherwise forwards it to every
//! other session with the send time translated into that receiver's clock.
//!
//! ```text
//! server_send   = client_sent_at - sender_offset
//! age           = now - server_send
//! receiver_send = server_send + receiver_offset
//! ```
//!
//! Each receiver's own offset is used for its translation. Receivers without
//! an estimate are skipped; a sender without one cannot be translated at all.
//! Uplink and downlink latency are simulated with async sleeps, one
//! independent downlink per receiver.

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use shared::{to_epoch_millis, Packet, RelayedCommand, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::broadcaster::Broadcaster;
use crate::config::LatencyRange;
use crate::error::{Result, SyncError};
use crate::offsets::OffsetRegistry;
use crate::sessions::SessionRegistry;

/// What happened to a submitted command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Dispatched to these receivers
    Delivered { receivers: Vec<SessionId> },
    /// Older than the staleness threshold on arrival
    Rejected { age_ms: i64 },
}

impl RelayOutcome {
    /// Reply string for the submitter, empty on success
    pub fn reply(&self) -> String {
        match self {
            RelayOutcome::Delivered { .. } => String::new(),
            RelayOutcome::Rejected { age_ms } => {
                SyncError::StaleCommand { age_ms: *age_ms }.to_string()
            }
        }
    }
}

pub struct CommandRelay {
    offsets: Arc<RwLock<OffsetRegistry>>,
    sessions: Arc<RwLock<SessionRegistry>>,
    broadcaster: Arc<dyn Broadcaster>,
    staleness_threshold: TimeDelta,
    uplink: LatencyRange,
    downlink: LatencyRange,
}

impl CommandRelay {
    pub fn new(
        offsets: Arc<RwLock<OffsetRegistry>>,
        sessions: Arc<RwLock<SessionRegistry>>,
        broadcaster: Arc<dyn Broadcaster>,
        staleness_threshold: TimeDelta,
        uplink: LatencyRange,
        downlink: LatencyRange,
    ) -> Self {
        Self {
            offsets,
            sessions,
            broadcaster,
            staleness_threshold,
            uplink,
            downlink,
        }
    }

    /// Simulates the uplink, then relays with the arrival time as `now`
    pub async fn submit_command(
        &self,
        sender: SessionId,
        client_sent_at: DateTime<Utc>,
        message: String,
    ) -> Result<RelayOutcome> {
        let uplink_ms = self.uplink.sample();
        if uplink_ms > 0 {
            sleep(Duration::from_millis(uplink_ms)).await;
        }

        let now = shared::now();
        self.relay_at(sender, client_sent_at, message, now, uplink_ms)
            .await
    }

    /// Validates and fans out a command that reached the server at `now`
    ///
    /// Returns once every eligible receiver has been dispatched to. A failed
    /// push to one receiver is logged and does not affect the others.
    pub async fn relay_at(
        &self,
        sender: SessionId,
        client_sent_at: DateTime<Utc>,
        message: String,
        now: DateTime<Utc>,
        uplink_ms: u64,
    ) -> Result<RelayOutcome> {
        let sender_offset = {
            let offsets = self.offsets.read().await;
            offsets
                .best_for(sender)
                .ok_or(SyncError::MissingClockEstimate(sender))?
                .client_offset()
        };

        let send_time_server = client_sent_at
            .checked_sub_signed(sender_offset)
            .ok_or(SyncError::InvalidTimestamp(to_epoch_millis(client_sent_at)))?;
        let age = now - send_time_server;

        if age >= self.staleness_threshold {
            info!(
                "Rejected command from session {}: {}ms old",
                sender,
                age.num_milliseconds()
            );
            return Ok(RelayOutcome::Rejected {
                age_ms: age.num_milliseconds(),
            });
        }

        let receivers: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            sessions
                .members()
                .into_iter()
                .filter(|id| *id != sender)
                .collect()
        };

        // Translate into every receiver's clock under one read lock
        let targets: Vec<(SessionId, DateTime<Utc>)> = {
            let offsets = self.offsets.read().await;
            receivers
                .into_iter()
                .filter_map(|receiver| match offsets.best_for(receiver) {
                    Some(estimate) => {
                        match send_time_server.checked_add_signed(estimate.client_offset()) {
                            Some(receiver_time) => Some((receiver, receiver_time)),
                            None => {
                                warn!("Skipping session {}: send time out of range", receiver);
                                None
                            }
                        }
                    }
                    None => {
                        debug!("Skipping session {}: no clock estimate", receiver);
                        None
                    }
                })
                .collect()
        };

        let mut deliveries = JoinSet::new();
        for (receiver, receiver_time) in targets {
            let downlink_ms = self.downlink.sample();
            let payload = RelayedCommand {
                send_time_sender_perspective: to_epoch_millis(client_sent_at),
                send_time_server_perspective: to_epoch_millis(send_time_server),
                send_time_receiver_perspective: to_epoch_millis(receiver_time),
                message: message.clone(),
                uplink_ms,
                downlink_ms,
                total_ms: uplink_ms + downlink_ms,
            };

            let broadcaster = Arc::clone(&self.broadcaster);
            deliveries.spawn(async move {
                if downlink_ms > 0 {
                    sleep(Duration::from_millis(downlink_ms)).await;
                }
                let pushed = broadcaster.push_to(receiver, Packet::RelayedCommand(payload));
                (receiver, pushed)
            });
        }

        let mut delivered = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((receiver, Ok(()))) => delivered.push(receiver),
                Ok((receiver, Err(e))) => {
                    warn!("Failed to relay command to session {}: {}", receiver, e)
                }
                Err(e) => warn!("Relay delivery task failed: {}", e),
            }
        }
        delivered.sort_unstable();

        debug!(
            "Relayed command from session {} to {:?} ({}ms old)",
            sender,
            delivered,
            age.num_milliseconds()
        );

        Ok(RelayOutcome::Delivered {
            receivers: delivered,
        })
    }
}
