//! Monotonic wall-clock source, injected rather than read from a global.
//!
//! `Assembler` needs "now" to stamp a partial scan's first arrival without
//! a parameter on every `add_chunk` call (the wire protocol doesn't carry
//! one); everything else in the core (`ElevationMap::integrate_scan`,
//! `Assembler::maintenance`) takes `now` explicitly from the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of monotonic-ish wall-clock seconds.
pub trait Clock: Send + Sync {
    fn now_sec(&self) -> f64;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_sec(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A clock whose value is set explicitly, for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start_sec: f64) -> Self {
        Self {
            bits: AtomicU64::new(start_sec.to_bits()),
        }
    }

    pub fn set(&self, sec: f64) {
        self.bits.store(sec.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_sec: f64) {
        self.set(self.now_sec() + delta_sec);
    }
}

impl Clock for ManualClock {
    fn now_sec(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
