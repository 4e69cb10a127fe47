//! Registry of probes sent to clients and still answerable
//!
//! Each probe is written once when the scheduler fires and never changes
//! afterwards. Responses look the probe up by id to recover its send time.
//! The ledger keeps at most `capacity` probes and drops the oldest beyond
//! that, so a long-running server does not grow without bound.

use chrono::{DateTime, Utc};
use log::debug;
use shared::TimeSyncEstimate;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::error::{Result, SyncError};

pub struct PingLedger {
    probes: HashMap<Uuid, TimeSyncEstimate>,
    /// Probe ids in creation order, oldest first
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl PingLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            probes: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Creates and stores a fresh probe stamped with the current server time
    pub fn create_probe(&mut self) -> TimeSyncEstimate {
        self.create_probe_at(shared::now())
    }

    /// Creates and stores a fresh probe with an explicit send time
    pub fn create_probe_at(&mut self, server_sent_at: DateTime<Utc>) -> TimeSyncEstimate {
        // v4 ids are random, so concurrent schedulers cannot collide
        let probe = TimeSyncEstimate::probe(Uuid::new_v4(), server_sent_at);

        self.probes.insert(probe.probe_id, probe.clone());
        self.order.push_back(probe.probe_id);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.probes.remove(&oldest);
                debug!("Evicted probe {} from ledger", oldest);
            }
        }

        probe
    }

    pub fn lookup(&self, probe_id: &Uuid) -> Result<TimeSyncEstimate> {
        self.probes
            .get(probe_id)
            .cloned()
            .ok_or(SyncError::UnknownPing(*probe_id))
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}
