//! Push capability used by the clock-sync core
//!
//! The scheduler and the relay only ever need to push a packet to every
//! session or to one session. They see that through the `Broadcaster` trait
//! and never touch sockets or addresses.

use log::error;
use shared::{Packet, SessionId};
use std::net::SocketAddr;
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};

pub trait Broadcaster: Send + Sync {
    fn push_to_all(&self, packet: Packet) -> Result<()>;

    fn push_to(&self, session_id: SessionId, packet: Packet) -> Result<()>;
}

/// Packets queued for the network sender task
#[derive(Debug)]
pub enum Outbound {
    /// Direct answer to an address that may not hold a session yet
    Reply {
        packet: Packet,
        addr: SocketAddr,
    },
    SendTo {
        session_id: SessionId,
        packet: Packet,
    },
    Broadcast {
        packet: Packet,
    },
}

/// Forwards pushes to the network sender task over an unbounded channel
#[derive(Clone)]
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelBroadcaster {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn push_to_all(&self, packet: Packet) -> Result<()> {
        self.tx.send(Outbound::Broadcast { packet }).map_err(|e| {
            error!("Failed to queue broadcast packet: {}", e);
            SyncError::ChannelClosed
        })
    }

    fn push_to(&self, session_id: SessionId, packet: Packet) -> Result<()> {
        self.tx
            .send(Outbound::SendTo { session_id, packet })
            .map_err(|e| {
                error!("Failed to queue packet for session {}: {}", session_id, e);
                SyncError::ChannelClosed
            })
    }
}
