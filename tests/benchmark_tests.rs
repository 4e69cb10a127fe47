//! Performance benchmarks for the clock-sync hot paths

use chrono::TimeDelta;
use server::broadcaster::{Broadcaster, ChannelBroadcaster};
use server::config::LatencyRange;
use server::ledger::PingLedger;
use server::offsets::OffsetRegistry;
use server::relay::{CommandRelay, RelayOutcome};
use server::sessions::SessionRegistry;
use shared::{decode, encode, from_epoch_millis, Packet, TimeSyncEstimate};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};

/// Benchmarks probe creation including ledger eviction
#[test]
fn benchmark_probe_creation() {
    let mut ledger = PingLedger::new(10_000);

    let iterations = 100_000;
    let start = Instant::now();

    let mut ids = HashSet::with_capacity(iterations);
    for _ in 0..iterations {
        ids.insert(ledger.create_probe().probe_id);
    }

    let duration = start.elapsed();
    println!(
        "Probe creation: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(ids.len(), iterations);
    assert_eq!(ledger.len(), 10_000);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks pong recording across many sessions
#[test]
fn benchmark_offset_updates() {
    let mut ledger = PingLedger::new(1_000);
    let mut offsets = OffsetRegistry::new();

    let probes: Vec<TimeSyncEstimate> = (0..1_000)
        .map(|i| ledger.create_probe_at(from_epoch_millis(1_000_000 + i)))
        .collect();

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let probe = &probes[i % probes.len()];
        let sent = shared::to_epoch_millis(probe.server_sent_at);
        let roundtrip = (i % 97) as i64;
        let session_id = (i % 64) as u32;

        let _ = offsets.record_response(
            &ledger,
            &probe.probe_id,
            session_id,
            from_epoch_millis(sent + roundtrip / 2 + 250),
            from_epoch_millis(sent + roundtrip),
        );
    }

    let duration = start.elapsed();
    println!(
        "Offset updates: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(offsets.len(), 64);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks estimate snapshot serialization
#[test]
fn benchmark_estimate_serialization() {
    let mut ledger = PingLedger::new(64);
    let mut offsets = OffsetRegistry::new();
    for session_id in 0..32 {
        let probe = ledger.create_probe_at(from_epoch_millis(5_000_000));
        offsets
            .record_response(
                &ledger,
                &probe.probe_id,
                session_id,
                from_epoch_millis(5_000_000 + i64::from(session_id)),
                from_epoch_millis(5_000_040),
            )
            .unwrap();
    }
    let packet = Packet::Estimates {
        estimates: offsets.snapshot().iter().map(|e| e.report()).collect(),
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let data = encode(&packet).unwrap();
        let _ = decode(&data).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Estimate serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(encode(&packet).unwrap().len() < shared::MAX_PACKET_SIZE);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks command fan-out to a full room
#[tokio::test]
async fn benchmark_relay_fan_out() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(ChannelBroadcaster::new(tx));
    let offsets = Arc::new(RwLock::new(OffsetRegistry::new()));
    let sessions = Arc::new(RwLock::new(SessionRegistry::new(32)));

    let mut ledger = PingLedger::new(32);
    for port in 20_000..20_032u16 {
        let addr = format!("127.0.0.1:{}", port).parse().unwrap();
        let session_id = sessions.write().await.on_connect(addr).unwrap();
        let probe = ledger.create_probe_at(from_epoch_millis(1_000_000));
        offsets
            .write()
            .await
            .record_response(
                &ledger,
                &probe.probe_id,
                session_id,
                from_epoch_millis(1_000_010 + i64::from(port)),
                from_epoch_millis(1_000_020),
            )
            .unwrap();
    }

    let relay = CommandRelay::new(
        offsets,
        sessions,
        broadcaster,
        TimeDelta::milliseconds(1000),
        LatencyRange::none(),
        LatencyRange::none(),
    );

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        // Session 1 runs 20s ahead
        let outcome = relay
            .relay_at(
                1,
                from_epoch_millis(2_020_000 + i),
                "benchmark".to_string(),
                from_epoch_millis(2_000_000 + i),
                0,
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RelayOutcome::Delivered { ref receivers } if receivers.len() == 31
        ));
        while rx.try_recv().is_ok() {}
    }

    let duration = start.elapsed();
    println!(
        "Relay fan-out: {} commands to 31 receivers in {:?} ({:.2} μs/command)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}
