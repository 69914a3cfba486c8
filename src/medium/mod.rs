//! Packet media
//!
//! The NAT reads raw IPv4 datagrams from a medium and writes translated ones
//! back to it:
//! - TUN: a Linux layer-3 device (no packet information header)
//! - Memory: channel-backed medium for tests and embedding

mod memory;
#[cfg(target_os = "linux")]
mod tun;

pub use memory::{MemoryMedium, MemoryPeer};
#[cfg(target_os = "linux")]
pub use tun::TunDevice;

use crate::Result;
use std::future::Future;

/// Source and sink of IPv4 datagrams
pub trait Medium: Send {
    /// Receive one datagram into `buf`, returning its length
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Send one datagram
    fn send(&mut self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}
