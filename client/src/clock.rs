//! The client's notion of wall-clock time
//!
//! A real deployment would just read the system clock. The skew lets several
//! clients on one machine pretend to have clocks that disagree, which is what
//! the server's offset estimation is there to detect.

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock {
    skew_ms: i64,
}

impl LocalClock {
    pub fn new(skew_ms: i64) -> Self {
        Self { skew_ms }
    }

    pub fn skew_ms(&self) -> i64 {
        self.skew_ms
    }

    /// Local epoch milliseconds
    pub fn now_millis(&self) -> i64 {
        shared::now_millis() + self.skew_ms
    }
}
