//! Protocol state of one client, independent of the socket
//!
//! `handle_packet` takes whatever the server pushed and returns the packet
//! to send back, if any. Keeping this free of I/O lets the probe answering
//! and bookkeeping be tested directly.

use log::{debug, info, warn};
use shared::{EstimateReport, Packet, RelayedCommand, SessionId};
use std::collections::HashMap;

use crate::clock::LocalClock;
use crate::stats::{RelaySample, RelayStats};

pub struct ClientState {
    pub session_id: Option<SessionId>,
    pub connected: bool,
    clock: LocalClock,

    /// Latest member list pushed by the server
    pub sessions: Vec<SessionId>,
    /// Latest best-estimate snapshot pushed by the server
    pub estimates: Vec<EstimateReport>,

    next_request_id: u32,
    /// Submitted commands awaiting a result, by request id
    outstanding: HashMap<u32, String>,
    pub stats: RelayStats,
}

impl ClientState {
    pub fn new(clock: LocalClock) -> Self {
        Self {
            session_id: None,
            connected: false,
            clock,
            sessions: Vec::new(),
            estimates: Vec::new(),
            next_request_id: 1,
            outstanding: HashMap::new(),
            stats: RelayStats::default(),
        }
    }

    pub fn clock(&self) -> LocalClock {
        self.clock
    }

    /// The server's current estimate of our own clock offset
    pub fn own_estimate(&self) -> Option<&EstimateReport> {
        let session_id = self.session_id?;
        self.estimates
            .iter()
            .find(|estimate| estimate.session_id == Some(session_id))
    }

    /// Builds a command stamped with the local clock and remembers it
    pub fn next_command(&mut self, message: &str) -> Packet {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.outstanding.insert(request_id, message.to_string());
        self.stats.submitted += 1;

        Packet::SubmitCommand {
            request_id,
            client_sent_at: self.clock.now_millis(),
            message: message.to_string(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Applies a server packet and returns the reply, if one is due
    pub fn handle_packet(&mut self, packet: Packet) -> Option<Packet> {
        match packet {
            Packet::Connected { session_id } => {
                info!("Connected! Session ID: {}", session_id);
                self.session_id = Some(session_id);
                self.connected = true;
                None
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                None
            }

            Packet::Ping { probe_id, .. } => Some(Packet::Pong {
                probe_id,
                client_sent_at: self.clock.now_millis(),
            }),

            Packet::Estimates { estimates } => {
                self.estimates = estimates;
                if let Some(own) = self.own_estimate() {
                    debug!(
                        "Own offset {}ms (roundtrip {}ms)",
                        own.client_offset_ms, own.roundtrip_ms
                    );
                }
                None
            }

            Packet::Sessions { session_ids } => {
                info!("Connected sessions: {:?}", session_ids);
                self.sessions = session_ids;
                None
            }

            Packet::CommandResult { request_id, result } => {
                let message = self.outstanding.remove(&request_id).unwrap_or_default();
                if result.is_empty() {
                    self.stats.accepted += 1;
                    debug!("Command {} ({:?}) relayed", request_id, message);
                } else {
                    self.stats.rejected += 1;
                    info!("Command {} ({:?}): {}", request_id, message, result);
                }
                None
            }

            Packet::RelayedCommand(command) => {
                self.record_relayed(&command);
                None
            }

            _ => {
                warn!("Unexpected packet type");
                None
            }
        }
    }

    fn record_relayed(&mut self, command: &RelayedCommand) {
        let lateness_ms = self.clock.now_millis() - command.send_time_receiver_perspective;
        info!(
            "Received {:?}: sent {}ms ago by our clock (simulated {}ms up + {}ms down)",
            command.message, lateness_ms, command.uplink_ms, command.downlink_ms
        );
        self.stats.record(RelaySample {
            lateness_ms,
            simulated_ms: command.total_ms,
        });
    }
}
