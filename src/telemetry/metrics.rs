//! Translation counters.
//!
//! Thread-safe counters updated by the packet loop and exported in status
//! snapshots.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters for the translator.
#[derive(Debug, Default)]
pub struct NatMetrics {
    /// Packets read from the medium
    pub packets_in: Counter,
    /// Egress packets rewritten to the global address
    pub egress_translated: Counter,
    /// Ingress packets rewritten back to a local endpoint
    pub ingress_translated: Counter,
    /// Egress bytes after translation
    pub egress_bytes: Counter,
    /// Ingress bytes after translation
    pub ingress_bytes: Counter,
    /// Egress packets dropped because no global port was free
    pub no_empty_port: Counter,
    /// Ingress packets without a session
    pub ingress_misses: Counter,
    /// Packets of a protocol the translator does not handle
    pub unsupported: Counter,
    /// Packets that failed to parse
    pub malformed: Counter,
    /// Sessions evicted by the periodic sweep
    pub swept: Counter,
    /// Failed reads from the medium that did not stop the service
    pub recv_errors: Counter,
}

/// Point-in-time copy of [`NatMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot(pub Vec<(String, u64)>);

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

impl NatMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports all counters as name/value pairs.
    pub fn export(&self) -> MetricsSnapshot {
        MetricsSnapshot(vec![
            ("packets_in".into(), self.packets_in.get()),
            ("egress_translated".into(), self.egress_translated.get()),
            ("ingress_translated".into(), self.ingress_translated.get()),
            ("egress_bytes".into(), self.egress_bytes.get()),
            ("ingress_bytes".into(), self.ingress_bytes.get()),
            ("no_empty_port".into(), self.no_empty_port.get()),
            ("ingress_misses".into(), self.ingress_misses.get()),
            ("unsupported".into(), self.unsupported.get()),
            ("malformed".into(), self.malformed.get()),
            ("swept".into(), self.swept.get()),
            ("recv_errors".into(), self.recv_errors.get()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(10);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_nat_metrics_export() {
        let metrics = NatMetrics::new();

        metrics.egress_translated.inc();
        metrics.egress_bytes.add(1500);
        metrics.ingress_misses.add(3);

        let snapshot = metrics.export();
        assert_eq!(snapshot.get("egress_translated"), Some(1));
        assert_eq!(snapshot.get("egress_bytes"), Some(1500));
        assert_eq!(snapshot.get("ingress_misses"), Some(3));
        assert_eq!(snapshot.get("malformed"), Some(0));
        assert_eq!(snapshot.get("nonexistent"), None);
    }
}
