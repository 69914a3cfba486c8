//! rat - userspace NAT
//!
//! Translates IPv4 traffic between a private network and a single global
//! address. Sessions live in per-protocol tables (TCP, UDP, ICMP echo), each
//! running one of four NAT behaviours: full cone, restricted cone,
//! port-restricted cone or symmetric. Idle sessions are evicted
//! least-recently-used first.

pub mod config;
pub mod dataplane;
pub mod error;
pub mod medium;
pub mod protocol;
pub mod service;
pub mod telemetry;

pub use error::{Error, Result};
