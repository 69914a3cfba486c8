//! NAT behaviour variants (RFC 4787)
//!
//! Every variant runs on the same table mechanics and only decides:
//! - the local key that identifies a session on egress
//! - the remote key that identifies it on ingress (and detects collisions)
//! - how a global port is chosen and what happens to it on eviction
//!
//! | Variant              | Local key                 | Remote key              | Allocation      |
//! |----------------------|---------------------------|-------------------------|-----------------|
//! | Symmetric            | local + remote endpoint   | port + remote endpoint  | random probe    |
//! | Port-restricted cone | local + remote endpoint   | port + remote endpoint  | sticky, probe   |
//! | Restricted cone      | local endpoint + remote IP | port + remote IP       | sticky, probe   |
//! | Full cone            | local endpoint            | port                    | exclusive FIFO  |

use super::port_pool::{ExclusivePool, PortProbe, PortSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Variant selector used by configuration and status output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatKind {
    FullCone,
    RestrictedCone,
    PortRestrictedCone,
    Symmetric,
}

impl fmt::Display for NatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NatKind::FullCone => "full_cone",
            NatKind::RestrictedCone => "restricted_cone",
            NatKind::PortRestrictedCone => "port_restricted_cone",
            NatKind::Symmetric => "symmetric",
        };
        f.write_str(name)
    }
}

/// Inputs to a port allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRequest {
    pub remote: SocketAddrV4,
    pub local_port: u16,
    /// Port last assigned to the same local endpoint, if any
    pub sticky: Option<u16>,
}

/// Key derivation and port policy of one NAT behaviour.
pub trait Variant: Send {
    type LocalKey: Hash + Eq + Clone + fmt::Debug + Send;
    type RemoteKey: Hash + Eq + Clone + fmt::Debug + Send;

    const KIND: NatKind;

    fn local_key(local: SocketAddrV4, remote: SocketAddrV4) -> Self::LocalKey;

    fn remote_key(global_port: u16, remote: SocketAddrV4) -> Self::RemoteKey;

    /// Pick a global port. `collides` reports whether a port is already
    /// taken under this variant's remote key for the requested remote.
    fn allocate_port<F>(&mut self, request: &PortRequest, collides: F) -> Option<u16>
    where
        F: Fn(u16) -> bool;

    /// Called once for every evicted session.
    fn release_port(&mut self, _port: u16) {}
}

/// Fresh mapping per remote endpoint.
#[derive(Debug)]
pub struct Symmetric {
    probe: PortProbe,
}

impl Symmetric {
    pub fn new(probe: PortProbe) -> Self {
        Self { probe }
    }
}

impl Variant for Symmetric {
    type LocalKey = (SocketAddrV4, SocketAddrV4);
    type RemoteKey = (u16, SocketAddrV4);

    const KIND: NatKind = NatKind::Symmetric;

    fn local_key(local: SocketAddrV4, remote: SocketAddrV4) -> Self::LocalKey {
        (local, remote)
    }

    fn remote_key(global_port: u16, remote: SocketAddrV4) -> Self::RemoteKey {
        (global_port, remote)
    }

    fn allocate_port<F>(&mut self, _request: &PortRequest, collides: F) -> Option<u16>
    where
        F: Fn(u16) -> bool,
    {
        self.probe.probe(collides)
    }
}

/// Symmetric keys, but a local endpoint keeps its port across remotes
/// whenever that does not collide. Behaves much like netfilter masquerade.
#[derive(Debug)]
pub struct PortRestrictedCone {
    probe: PortProbe,
}

impl PortRestrictedCone {
    pub fn new(probe: PortProbe) -> Self {
        Self { probe }
    }
}

impl Variant for PortRestrictedCone {
    type LocalKey = (SocketAddrV4, SocketAddrV4);
    type RemoteKey = (u16, SocketAddrV4);

    const KIND: NatKind = NatKind::PortRestrictedCone;

    fn local_key(local: SocketAddrV4, remote: SocketAddrV4) -> Self::LocalKey {
        (local, remote)
    }

    fn remote_key(global_port: u16, remote: SocketAddrV4) -> Self::RemoteKey {
        (global_port, remote)
    }

    fn allocate_port<F>(&mut self, request: &PortRequest, collides: F) -> Option<u16>
    where
        F: Fn(u16) -> bool,
    {
        sticky_first(&mut self.probe, request, collides)
    }
}

/// Remote port is ignored on both sides; only the remote address matters.
#[derive(Debug)]
pub struct RestrictedCone {
    probe: PortProbe,
}

impl RestrictedCone {
    pub fn new(probe: PortProbe) -> Self {
        Self { probe }
    }
}

impl Variant for RestrictedCone {
    type LocalKey = (SocketAddrV4, Ipv4Addr);
    type RemoteKey = (u16, Ipv4Addr);

    const KIND: NatKind = NatKind::RestrictedCone;

    fn local_key(local: SocketAddrV4, remote: SocketAddrV4) -> Self::LocalKey {
        (local, *remote.ip())
    }

    fn remote_key(global_port: u16, remote: SocketAddrV4) -> Self::RemoteKey {
        (global_port, *remote.ip())
    }

    fn allocate_port<F>(&mut self, request: &PortRequest, collides: F) -> Option<u16>
    where
        F: Fn(u16) -> bool,
    {
        sticky_first(&mut self.probe, request, collides)
    }
}

/// One mapping per local endpoint, reachable from any remote.
#[derive(Debug)]
pub struct FullCone {
    pool: ExclusivePool,
}

impl FullCone {
    pub fn new(ports: PortSet) -> Self {
        Self {
            pool: ExclusivePool::new(ports),
        }
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }
}

impl Variant for FullCone {
    type LocalKey = SocketAddrV4;
    type RemoteKey = u16;

    const KIND: NatKind = NatKind::FullCone;

    fn local_key(local: SocketAddrV4, _remote: SocketAddrV4) -> Self::LocalKey {
        local
    }

    fn remote_key(global_port: u16, _remote: SocketAddrV4) -> Self::RemoteKey {
        global_port
    }

    fn allocate_port<F>(&mut self, _request: &PortRequest, _collides: F) -> Option<u16>
    where
        F: Fn(u16) -> bool,
    {
        self.pool.take()
    }

    fn release_port(&mut self, port: u16) {
        self.pool.give_back(port);
    }
}

/// Reuse the sticky port unless it collides, otherwise probe.
fn sticky_first<F>(probe: &mut PortProbe, request: &PortRequest, collides: F) -> Option<u16>
where
    F: Fn(u16) -> bool,
{
    if let Some(port) = request.sticky {
        if !collides(port) {
            return Some(port);
        }
    }
    probe.probe(collides)
}
