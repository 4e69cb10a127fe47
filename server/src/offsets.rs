//! Best known clock offset for every session
//!
//! Each answered probe produces a candidate estimate. The registry keeps the
//! candidate with the lowest roundtrip seen so far for the session, because
//! the symmetric-latency assumption errs by at most half the roundtrip.
//! Ties keep the estimate already on record, so the stored roundtrip for a
//! session never increases.

use chrono::{DateTime, Utc};
use log::debug;
use shared::{SessionId, TimeSyncEstimate};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::Result;
use crate::ledger::PingLedger;

#[derive(Default)]
pub struct OffsetRegistry {
    best: BTreeMap<SessionId, TimeSyncEstimate>,
}

impl OffsetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes the referenced probe with a client response and records it
    ///
    /// Returns the estimate now on record for the session, which is the
    /// previous one when the new measurement was not strictly better.
    /// Fails with `UnknownPing` without touching any state if the ledger has
    /// no such probe.
    pub fn record_response(
        &mut self,
        ledger: &PingLedger,
        probe_id: &Uuid,
        session_id: SessionId,
        client_sent_at: DateTime<Utc>,
        server_received_at: DateTime<Utc>,
    ) -> Result<TimeSyncEstimate> {
        let probe = ledger.lookup(probe_id)?;
        let estimate = probe.complete(session_id, client_sent_at, server_received_at);
        Ok(self.record(estimate))
    }

    /// Applies the keep-lower-roundtrip rule to an answered estimate
    pub fn record(&mut self, estimate: TimeSyncEstimate) -> TimeSyncEstimate {
        let Some(session_id) = estimate.session_id else {
            return estimate;
        };

        match self.best.entry(session_id) {
            Entry::Vacant(slot) => slot.insert(estimate).clone(),
            Entry::Occupied(mut slot) => {
                if estimate.roundtrip_ms() < slot.get().roundtrip_ms() {
                    debug!(
                        "Session {} roundtrip improved {}ms -> {}ms",
                        session_id,
                        slot.get().roundtrip_ms(),
                        estimate.roundtrip_ms()
                    );
                    slot.insert(estimate);
                }
                slot.get().clone()
            }
        }
    }

    /// Best estimate for a session, `None` if it never answered a probe
    pub fn best_for(&self, session_id: SessionId) -> Option<TimeSyncEstimate> {
        self.best.get(&session_id).cloned()
    }

    /// Current best estimates ordered by session id
    pub fn snapshot(&self) -> Vec<TimeSyncEstimate> {
        self.best.values().cloned().collect()
    }

    /// Drops the estimate of a session that went away
    pub fn forget(&mut self, session_id: SessionId) -> bool {
        self.best.remove(&session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use shared::from_epoch_millis;

    fn respond(
        registry: &mut OffsetRegistry,
        ledger: &mut PingLedger,
        session: SessionId,
        t0: i64,
        tc: i64,
        t1: i64,
    ) -> TimeSyncEstimate {
        let probe = ledger.create_probe_at(from_epoch_millis(t0));
        registry
            .record_response(
                ledger,
                &probe.probe_id,
                session,
                from_epoch_millis(tc),
                from_epoch_millis(t1),
            )
            .unwrap()
    }

    #[test]
    fn test_first_response_is_recorded() {
        let mut ledger = PingLedger::new(64);
        let mut registry = OffsetRegistry::new();

        let on_record = respond(&mut registry, &mut ledger, 1, 1000, 1050, 1200);

        assert_eq!(on_record.roundtrip_ms(), 200);
        assert_eq!(on_record.client_offset_ms(), -50);
        assert_eq!(registry.best_for(1), Some(on_record));
    }

    #[test]
    fn test_lower_roundtrip_replaces() {
        let mut ledger = PingLedger::new(64);
        let mut registry = OffsetRegistry::new();

        respond(&mut registry, &mut ledger, 1, 1000, 1050, 1200);
        let better = respond(&mut registry, &mut ledger, 1, 2000, 2030, 2080);

        assert_eq!(better.roundtrip_ms(), 80);
        assert_eq!(registry.best_for(1).unwrap().roundtrip_ms(), 80);
        assert_eq!(registry.best_for(1).unwrap().client_offset_ms(), -10);
    }

    #[test]
    fn test_higher_roundtrip_and_ties_keep_existing() {
        let mut ledger = PingLedger::new(64);
        let mut registry = OffsetRegistry::new();

        let first = respond(&mut registry, &mut ledger, 1, 1000, 1050, 1100);
        let worse = respond(&mut registry, &mut ledger, 1, 2000, 2050, 2400);
        let tie = respond(&mut registry, &mut ledger, 1, 3000, 3090, 3100);

        assert_eq!(worse, first);
        assert_eq!(tie, first);
        assert_eq!(registry.best_for(1), Some(first));
    }

    #[test]
    fn test_roundtrip_never_increases() {
        let mut ledger = PingLedger::new(64);
        let mut registry = OffsetRegistry::new();
        let roundtrips = [300, 120, 450, 120, 90, 800, 95, 10, 60];

        let mut previous = i64::MAX;
        for (i, rt) in roundtrips.iter().enumerate() {
            let t0 = (i as i64 + 1) * 10_000;
            let on_record = respond(&mut registry, &mut ledger, 5, t0, t0 + rt / 2, t0 + rt);
            assert!(on_record.roundtrip_ms() <= previous);
            previous = on_record.roundtrip_ms();
        }

        assert_eq!(previous, 10);
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut ledger = PingLedger::new(64);
        let mut registry = OffsetRegistry::new();

        respond(&mut registry, &mut ledger, 1, 1000, 1050, 1100);
        respond(&mut registry, &mut ledger, 2, 1000, 6050, 1300);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.best_for(1).unwrap().roundtrip_ms(), 100);
        assert_eq!(registry.best_for(2).unwrap().roundtrip_ms(), 300);
        assert_eq!(registry.best_for(2).unwrap().client_offset_ms(), 4_900);
    }

    #[test]
    fn test_unknown_probe_leaves_state_untouched() {
        let mut ledger = PingLedger::new(64);
        let mut registry = OffsetRegistry::new();
        respond(&mut registry, &mut ledger, 1, 1000, 1050, 1200);
        let before = registry.snapshot();

        let bogus = Uuid::new_v4();
        let result = registry.record_response(
            &ledger,
            &bogus,
            1,
            from_epoch_millis(5000),
            from_epoch_millis(5001),
        );

        assert_eq!(result, Err(SyncError::UnknownPing(bogus)));
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_best_for_unknown_session() {
        let registry = OffsetRegistry::new();
        assert!(registry.best_for(99).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_ordered_by_session() {
        let mut ledger = PingLedger::new(64);
        let mut registry = OffsetRegistry::new();

        respond(&mut registry, &mut ledger, 3, 1000, 1000, 1010);
        respond(&mut registry, &mut ledger, 1, 1000, 1000, 1010);
        respond(&mut registry, &mut ledger, 2, 1000, 1000, 1010);

        let sessions: Vec<_> = registry
            .snapshot()
            .iter()
            .filter_map(|e| e.session_id)
            .collect();
        assert_eq!(sessions, vec![1, 2, 3]);
    }

    #[test]
    fn test_forget() {
        let mut ledger = PingLedger::new(64);
        let mut registry = OffsetRegistry::new();
        respond(&mut registry, &mut ledger, 1, 1000, 1050, 1200);

        assert!(registry.forget(1));
        assert!(!registry.forget(1));
        assert!(registry.best_for(1).is_none());
    }

    #[test]
    fn test_unanswered_estimate_is_not_recorded() {
        let mut registry = OffsetRegistry::new();
        let probe = TimeSyncEstimate::probe(Uuid::new_v4(), from_epoch_millis(0));

        registry.record(probe);
        assert!(registry.is_empty());
    }
}
