//! Roundtrip measurement and the clock offset derived from it
//!
//! A `TimeSyncEstimate` starts life as an unanswered probe (only the probe id
//! and the server send time are known) and is completed into a new record once
//! the client's pong arrives. Everything beyond the three raw timestamps is
//! derived on demand so it can never drift out of step with them.
//!
//! The offset assumes symmetric up/down latency, so every estimate carries an
//! error of up to half its roundtrip. Lower roundtrip means a tighter bound,
//! which is why the server keeps the lowest-roundtrip estimate per session.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{now, to_epoch_millis, SessionId};

/// One probe/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSyncEstimate {
    /// Identifier assigned when the probe was created
    pub probe_id: Uuid,
    /// Session that answered the probe, absent until a response arrives
    pub session_id: Option<SessionId>,
    /// Server clock when the probe was created
    pub server_sent_at: DateTime<Utc>,
    /// Client clock when the client answered
    pub client_sent_at: Option<DateTime<Utc>>,
    /// Server clock when the answer arrived
    pub server_received_at: Option<DateTime<Utc>>,
}

impl TimeSyncEstimate {
    /// Creates an unanswered probe
    pub fn probe(probe_id: Uuid, server_sent_at: DateTime<Utc>) -> Self {
        Self {
            probe_id,
            session_id: None,
            server_sent_at,
            client_sent_at: None,
            server_received_at: None,
        }
    }

    /// Builds the completed record for a response to this probe
    ///
    /// The probe itself is left untouched; the returned estimate reuses its
    /// id and send time.
    pub fn complete(
        &self,
        session_id: SessionId,
        client_sent_at: DateTime<Utc>,
        server_received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            probe_id: self.probe_id,
            session_id: Some(session_id),
            server_sent_at: self.server_sent_at,
            client_sent_at: Some(client_sent_at),
            server_received_at: Some(server_received_at),
        }
    }

    /// True once a client response has been folded in
    pub fn is_answered(&self) -> bool {
        self.client_sent_at.is_some() && self.server_received_at.is_some()
    }

    /// Server-side elapsed milliseconds between probe and response, 0 if unanswered
    pub fn roundtrip_ms(&self) -> i64 {
        match self.server_received_at {
            Some(received) => (received - self.server_sent_at).num_milliseconds(),
            None => 0,
        }
    }

    /// Client clock at the moment the probe left the server
    pub fn calculated_client_time(&self) -> Option<DateTime<Utc>> {
        if !self.is_answered() {
            return None;
        }
        let half_roundtrip = TimeDelta::milliseconds(self.roundtrip_ms() / 2);
        self.client_sent_at
            .and_then(|sent| sent.checked_sub_signed(half_roundtrip))
    }

    /// Client clock minus server clock, zero if unanswered
    pub fn client_offset(&self) -> TimeDelta {
        match self.calculated_client_time() {
            Some(calculated) => calculated - self.server_sent_at,
            None => TimeDelta::zero(),
        }
    }

    pub fn client_offset_ms(&self) -> i64 {
        self.client_offset().num_milliseconds()
    }

    pub fn server_current_time(&self) -> DateTime<Utc> {
        now()
    }

    /// The client's clock right now, as estimated from this measurement
    ///
    /// Saturates at the representable range instead of overflowing.
    pub fn client_current_time(&self) -> DateTime<Utc> {
        let offset = self.client_offset();
        self.server_current_time()
            .checked_add_signed(offset)
            .unwrap_or(if offset < TimeDelta::zero() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            })
    }

    /// Flattens the estimate into its wire form
    pub fn report(&self) -> EstimateReport {
        EstimateReport {
            probe_id: self.probe_id,
            session_id: self.session_id,
            server_sent_at: to_epoch_millis(self.server_sent_at),
            client_sent_at: self.client_sent_at.map(to_epoch_millis),
            server_received_at: self.server_received_at.map(to_epoch_millis),
            roundtrip_ms: self.roundtrip_ms(),
            client_offset_ms: self.client_offset_ms(),
            client_current_time: to_epoch_millis(self.client_current_time()),
        }
    }
}

/// Wire form of a `TimeSyncEstimate`, all timestamps in epoch milliseconds
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EstimateReport {
    pub probe_id: Uuid,
    pub session_id: Option<SessionId>,
    pub server_sent_at: i64,
    pub client_sent_at: Option<i64>,
    pub server_received_at: Option<i64>,
    pub roundtrip_ms: i64,
    pub client_offset_ms: i64,
    pub client_current_time: i64,
}
