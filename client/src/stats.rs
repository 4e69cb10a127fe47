//! Rolling diagnostics about relayed commands

use std::collections::VecDeque;

/// One relayed command as observed on arrival
#[derive(Debug, Clone, Copy)]
pub struct RelaySample {
    /// Local receive time minus the send time translated into our clock
    pub lateness_ms: i64,
    /// Artificial latency the server reported for both legs
    pub simulated_ms: u64,
}

/// Bounded history of relay samples plus submission counters
#[derive(Debug)]
pub struct RelayStats {
    history: VecDeque<RelaySample>,
    max_samples: usize,

    pub submitted: u32,
    pub accepted: u32,
    pub rejected: u32,
}

impl RelayStats {
    pub fn new(max_samples: usize) -> Self {
        Self {
            history: VecDeque::new(),
            max_samples: max_samples.max(1),
            submitted: 0,
            accepted: 0,
            rejected: 0,
        }
    }

    pub fn record(&mut self, sample: RelaySample) {
        self.history.push_back(sample);

        // Maintain max samples
        while self.history.len() > self.max_samples {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Mean lateness over the retained samples
    pub fn mean_lateness_ms(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let total: i64 = self.history.iter().map(|s| s.lateness_ms).sum();
        Some(total as f64 / self.history.len() as f64)
    }

    /// Mean gap between measured lateness and the latency the server simulated
    ///
    /// With perfect offsets this hovers around the real network delay; a
    /// large value means the offset estimates are off.
    pub fn mean_translation_error_ms(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let total: i64 = self
            .history
            .iter()
            .map(|s| s.lateness_ms - s.simulated_ms as i64)
            .sum();
        Some(total as f64 / self.history.len() as f64)
    }

    pub fn max_lateness_ms(&self) -> Option<i64> {
        self.history.iter().map(|s| s.lateness_ms).max()
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new(100)
    }
}
