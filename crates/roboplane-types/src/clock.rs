//! Wall-clock helpers.
//!
//! Components that reason about staleness take a [`Clock`] so tests can
//! drive time explicitly with a [`ManualClock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// A source of Unix timestamps in fractional seconds.
pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Current Unix time in fractional seconds.
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// The real wall clock.
pub fn system_clock() -> Clock {
    Arc::new(unix_now)
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    pub fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }

    pub fn set(&self, ts: f64) {
        self.bits.store(ts.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }

    /// A [`Clock`] that reads this manual clock.
    pub fn clock(&self) -> Clock {
        let bits = Arc::clone(&self.bits);
        Arc::new(move || f64::from_bits(bits.load(Ordering::SeqCst)))
    }
}
