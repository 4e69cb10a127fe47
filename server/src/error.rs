//! Errors raised by the clock-sync core and the relay

use shared::SessionId;
use std::net::SocketAddr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A pong referenced a probe the ledger never issued or already evicted
    #[error("unknown ping {0}")]
    UnknownPing(Uuid),

    /// No roundtrip has been recorded for the session yet
    #[error("no clock estimate for session {0}")]
    MissingClockEstimate(SessionId),

    /// The command was older than the staleness threshold on arrival
    #[error("Command rejected: already {age_ms}ms old.")]
    StaleCommand { age_ms: i64 },

    /// A client timestamp outside the range the server can translate
    #[error("timestamp {0} out of range")]
    InvalidTimestamp(i64),

    /// The session is live and bound to another address
    #[error("session {0} is in use")]
    SessionInUse(SessionId),

    /// The address already speaks for another session
    #[error("address {0} already holds a session")]
    AddressInUse(SocketAddr),

    /// No fresh session ids are left to hand out
    #[error("session ids exhausted")]
    SessionIdsExhausted,

    #[error("server full")]
    ServerFull,

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("outbound channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
