use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod estimate;

pub use estimate::{EstimateReport, TimeSyncEstimate};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PACKET_SIZE: usize = 8192;

/// Identifier the server hands out to each connected client
pub type SessionId = u32;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Reconnect {
        session_id: SessionId,
    },
    Disconnect,
    Pong {
        probe_id: Uuid,
        client_sent_at: i64,
    },
    SubmitCommand {
        request_id: u32,
        client_sent_at: i64,
        message: String,
    },
    StartPing,

    Connected {
        session_id: SessionId,
    },
    Disconnected {
        reason: String,
    },
    Ping {
        probe_id: Uuid,
        server_sent_at: i64,
    },
    Estimates {
        estimates: Vec<EstimateReport>,
    },
    Sessions {
        session_ids: Vec<SessionId>,
    },
    CommandResult {
        request_id: u32,
        result: String,
    },
    RelayedCommand(RelayedCommand),
}

/// A command as delivered to one receiver, with every leg's timestamps
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RelayedCommand {
    pub send_time_sender_perspective: i64,
    pub send_time_server_perspective: i64,
    pub send_time_receiver_perspective: i64,
    pub message: String,
    pub uplink_ms: u64,
    pub downlink_ms: u64,
    pub total_ms: u64,
}

/// Current UTC time truncated to millisecond precision
pub fn now() -> DateTime<Utc> {
    from_epoch_millis(Utc::now().timestamp_millis())
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_epoch_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Converts wire milliseconds back to a timestamp, out-of-range values map to the epoch
pub fn from_epoch_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Last millisecond of year 9999, the latest timestamp accepted off the wire
pub const MAX_WIRE_MILLIS: i64 = 253_402_300_799_999;

/// Converts a client-supplied timestamp, refusing pre-epoch or far-future values
///
/// Keeping wire times in this window bounds every offset derived from them,
/// so translating between clocks can never leave chrono's range.
pub fn checked_from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    if !(0..=MAX_WIRE_MILLIS).contains(&millis) {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

pub fn encode(packet: &Packet) -> bincode::Result<Vec<u8>> {
    bincode::serialize(packet)
}

pub fn decode(data: &[u8]) -> bincode::Result<Packet> {
    bincode::deserialize(data)
}
