//! NAT session entry

use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddrV4};

/// One live translation.
///
/// The endpoint fields and the global port are fixed at creation. The
/// traffic counters belong to the packet path; the table only moves
/// `last_access`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    local_addr: Ipv4Addr,
    local_port: u16,
    remote_addr: Ipv4Addr,
    remote_port: u16,
    global_port: u16,
    created_at: u64,
    last_access: u64,
    /// Packets translated egress
    pub packets_sent: u64,
    /// Packets translated ingress
    pub packets_received: u64,
    /// Bytes translated egress
    pub bytes_sent: u64,
    /// Bytes translated ingress
    pub bytes_received: u64,
}

impl Entry {
    pub(crate) fn new(
        local: SocketAddrV4,
        remote: SocketAddrV4,
        global_port: u16,
        now: u64,
    ) -> Self {
        Self {
            local_addr: *local.ip(),
            local_port: local.port(),
            remote_addr: *remote.ip(),
            remote_port: remote.port(),
            global_port,
            created_at: now,
            last_access: now,
            packets_sent: 0,
            packets_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_addr(&self) -> Ipv4Addr {
        self.remote_addr
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn global_port(&self) -> u16 {
        self.global_port
    }

    /// Internal endpoint (source side before translation)
    pub fn local(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.local_addr, self.local_port)
    }

    /// Remote peer the session was opened towards
    pub fn remote(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.remote_addr, self.remote_port)
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.last_access = now;
    }

    /// Account one egress packet of `bytes` length.
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Account one ingress packet of `bytes` length.
    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }
}
