use std::fmt;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

static FALLBACK_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds on the raw monotonic clock. Never returns 0, which is reserved
/// for "checkpoint not reached".
pub fn monotonic_ns() -> u64 {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        let mut ts: libc::timespec = std::mem::zeroed();
        if libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) == 0 {
            let ns = (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64);
            return ns.max(1);
        }
    }
    // fallback
    FALLBACK_ANCHOR.elapsed().as_nanos() as u64 + 1
}

/// A point on a monotonic clock, in nanoseconds. The zero value means the
/// checkpoint was never reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const UNSET: Timestamp = Timestamp(0);

    pub fn from_nanos(ns: u64) -> Self {
        Timestamp(ns)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    /// Time elapsed from `self` to `later`.
    ///
    /// Zero if either end is unset or if `later` precedes `self`.
    pub fn until(self, later: Timestamp) -> Duration {
        if !self.is_set() || !later.is_set() {
            return Duration::ZERO;
        }
        Duration::from_nanos(later.0.saturating_sub(self.0))
    }
}

/// Source of checkpoint timestamps. Injected into the probe so tests can
/// drive it with a deterministic sequence.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(monotonic_ns())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Advances by a fixed step on every read, starting one step after zero.
    #[derive(Debug)]
    pub struct StepClock {
        step: u64,
        last: AtomicU64,
    }

    impl StepClock {
        pub fn new(step: Duration) -> Self {
            Self {
                step: step.as_nanos() as u64,
                last: AtomicU64::new(0),
            }
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> Timestamp {
            Timestamp(self.last.fetch_add(self.step, Ordering::SeqCst) + self.step)
        }
    }
}
