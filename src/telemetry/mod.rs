//! Telemetry module for logging, session events and counters.
//!
//! Provides:
//! - Diagnostic logging configuration and initialization
//! - The operator-facing session event log
//! - Translation counters

mod event_log;
mod logging;
mod metrics;

pub use event_log::{DeleteCounters, EventKind, EventLog, SessionEvent};
pub use logging::{init_logging, LogConfig};
pub use metrics::{Counter, MetricsSnapshot, NatMetrics};
