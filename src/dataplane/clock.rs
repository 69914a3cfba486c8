//! Monotonic second clocks used for session aging.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic time in whole seconds.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> u64;
}

/// Seconds elapsed since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

/// Clock advanced by hand, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::Relaxed);
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.secs.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(10);
        let other = clock.clone();

        clock.advance(5);
        assert_eq!(other.now(), 15);

        other.set(3);
        assert_eq!(clock.now(), 3);
    }

    #[test]
    fn test_monotonic_clock_starts_at_zero() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.now(), 0);
    }
}
