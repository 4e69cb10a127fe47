//! Server tunables and the artificial latency model

use chrono::TimeDelta;
use rand::Rng;
use std::time::Duration;

/// Inclusive-exclusive range of simulated link latency in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// A range that never delays
    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// Draws one latency; empty or inverted ranges yield `min_ms`
    pub fn sample(&self) -> u64 {
        if self.max_ms <= self.min_ms {
            return self.min_ms;
        }
        rand::thread_rng().gen_range(self.min_ms..self.max_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_sessions: usize,
    /// Sessions silent for longer than this are dropped
    pub session_timeout: Duration,
    pub ping_interval: Duration,
    /// Simulated downlink delay before a probe goes out
    pub probe_delay: Duration,
    /// Simulated uplink delay before a pong is timestamped
    pub pong_delay: Duration,
    /// Most probes the ledger keeps answerable
    pub ledger_capacity: usize,
    pub staleness_threshold: TimeDelta,
    pub uplink_latency: LatencyRange,
    pub downlink_latency: LatencyRange,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_sessions: 32,
            session_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_millis(5000),
            probe_delay: Duration::ZERO,
            pong_delay: Duration::ZERO,
            ledger_capacity: 10_000,
            staleness_threshold: TimeDelta::milliseconds(1000),
            uplink_latency: LatencyRange::new(500, 1500),
            downlink_latency: LatencyRange::new(0, 500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();

        assert_eq!(config.ping_interval, Duration::from_millis(5000));
        assert_eq!(config.staleness_threshold.num_milliseconds(), 1000);
        assert_eq!(config.uplink_latency, LatencyRange::new(500, 1500));
        assert_eq!(config.downlink_latency, LatencyRange::new(0, 500));
    }

    #[test]
    fn test_sample_stays_in_range() {
        let range = LatencyRange::new(500, 1500);
        for _ in 0..1_000 {
            let latency = range.sample();
            assert!((500..1500).contains(&latency));
        }
    }

    #[test]
    fn test_degenerate_ranges() {
        assert_eq!(LatencyRange::none().sample(), 0);
        assert_eq!(LatencyRange::new(250, 250).sample(), 250);
        assert_eq!(LatencyRange::new(300, 100).sample(), 300);
    }
}
