//! Packet formats
//!
//! IPv4 with just enough of TCP, UDP and ICMP echo to rewrite ports and
//! identifiers.

pub mod checksum;
pub mod ipv4;

pub use ipv4::{EchoKind, Ipv4Packet, Transport, PROTO_ICMP, PROTO_TCP, PROTO_UDP};
