//! NAT session table
//!
//! One table per transport class. Sessions live in an LRU-ordered
//! [`SessionList`] and are reachable through two indices whose keys come from
//! the [`Variant`]:
//! - local index: egress lookups
//! - remote index: ingress lookups and allocation-time collision checks
//!
//! Both indices and the list always hold the same set of sessions. Idle
//! sessions are evicted oldest first by [`NatTable::gc`], which runs before
//! every port allocation and may also be driven by a periodic sweep.

use super::clock::{Clock, MonotonicClock};
use super::entry::Entry;
use super::port_pool::{PortProbe, PortSet};
use super::session_list::{self, SessionList, SlotId};
use super::variant::{
    FullCone, NatKind, PortRequest, PortRestrictedCone, RestrictedCone, Symmetric, Variant,
};
use crate::telemetry::{DeleteCounters, EventKind, EventLog, SessionEvent};
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Object-safe view of a table, used to hold tables of different variants
/// side by side.
pub trait SessionTable: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> NatKind;

    fn idle_timeout(&self) -> u64;

    /// Find or create the session for an outbound flow. `None` means no
    /// global port could be allocated and the packet should be dropped.
    fn lookup_egress(&mut self, local: SocketAddrV4, remote: SocketAddrV4) -> Option<&mut Entry>;

    /// Find the session an inbound packet belongs to.
    fn lookup_ingress(&mut self, global_port: u16, remote: SocketAddrV4) -> Option<&mut Entry>;

    /// Same as [`SessionTable::lookup_ingress`] with the ICMP echo
    /// identifier standing in for the port.
    fn icmp_lookup_ingress(&mut self, global_port: u16, remote: SocketAddrV4)
        -> Option<&mut Entry>;

    /// Evict idle sessions, returning how many were removed.
    fn gc(&mut self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool;

    /// Live sessions from least to most recently used.
    fn entries(&self) -> Box<dyn Iterator<Item = &Entry> + '_>;
}

/// Session table generic over the NAT behaviour.
pub struct NatTable<V: Variant> {
    name: String,
    idle_timeout: u64,
    list: SessionList,
    locals: HashMap<V::LocalKey, SlotId>,
    remotes: HashMap<V::RemoteKey, SlotId>,
    /// Last global port handed to each local endpoint. Never pruned.
    last_assigned: HashMap<SocketAddrV4, u16>,
    variant: V,
    events: Arc<EventLog>,
    clock: Arc<dyn Clock>,
}

impl<V: Variant> NatTable<V> {
    /// Create a table evicting sessions idle for more than `idle_timeout`
    /// seconds.
    pub fn new(name: impl Into<String>, idle_timeout: u64, variant: V) -> Self {
        Self {
            name: name.into(),
            idle_timeout,
            list: SessionList::new(),
            locals: HashMap::new(),
            remotes: HashMap::new(),
            last_assigned: HashMap::new(),
            variant,
            events: Arc::new(EventLog::disabled()),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn with_event_log(mut self, events: Arc<EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn idle_timeout(&self) -> u64 {
        self.idle_timeout
    }

    pub fn variant(&self) -> &V {
        &self.variant
    }

    pub fn lookup_egress(
        &mut self,
        local: SocketAddrV4,
        remote: SocketAddrV4,
    ) -> Option<&mut Entry> {
        let now = self.clock.now();
        let key = V::local_key(local, remote);

        if let Some(&id) = self.locals.get(&key) {
            self.list.relink(id, now);
            return self.list.get_mut(id);
        }

        self.gc();

        let request = PortRequest {
            remote,
            local_port: local.port(),
            sticky: self.last_assigned.get(&local).copied(),
        };
        let remotes = &self.remotes;
        let allocated = self
            .variant
            .allocate_port(&request, |port| remotes.contains_key(&V::remote_key(port, remote)));

        let Some(global_port) = allocated else {
            warn!(
                table = %self.name,
                local = %local,
                remote = %remote,
                size = self.list.len(),
                "No empty port"
            );
            self.events.record(
                &SessionEvent::new(EventKind::NoEmptyPort, &self.name, *remote.ip(), remote.port())
                    .local(*local.ip(), local.port())
                    .table_size(self.list.len()),
            );
            return None;
        };

        let remote_key = V::remote_key(global_port, remote);
        debug_assert!(
            !self.remotes.contains_key(&remote_key),
            "allocated port {global_port} collides in table {}",
            self.name
        );

        let id = self.list.link(Entry::new(local, remote, global_port, now), now);
        self.locals.insert(key, id);
        self.remotes.insert(remote_key, id);
        self.last_assigned.insert(local, global_port);
        self.check_invariants();

        debug!(
            table = %self.name,
            local = %local,
            remote = %remote,
            global_port,
            size = self.list.len(),
            "Session inserted"
        );
        self.events.record(
            &SessionEvent::new(EventKind::Insert, &self.name, *remote.ip(), remote.port())
                .local(*local.ip(), local.port())
                .global_port(global_port)
                .table_size(self.list.len()),
        );

        self.list.get_mut(id)
    }

    pub fn lookup_ingress(&mut self, global_port: u16, remote: SocketAddrV4) -> Option<&mut Entry> {
        self.find_ingress(global_port, remote, EventKind::IngressNotFound)
    }

    pub fn icmp_lookup_ingress(
        &mut self,
        global_port: u16,
        remote: SocketAddrV4,
    ) -> Option<&mut Entry> {
        self.find_ingress(global_port, remote, EventKind::IcmpIngressNotFound)
    }

    pub fn gc(&mut self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        while let Some((id, head)) = self.list.head() {
            // Expired when last_access < now - idle_timeout
            if head.last_access().saturating_add(self.idle_timeout) >= now {
                break;
            }
            self.evict(id);
            removed += 1;
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Live sessions from least to most recently used.
    pub fn iter(&self) -> session_list::Iter<'_> {
        self.list.iter()
    }

    fn find_ingress(
        &mut self,
        global_port: u16,
        remote: SocketAddrV4,
        miss: EventKind,
    ) -> Option<&mut Entry> {
        match self.remotes.get(&V::remote_key(global_port, remote)).copied() {
            Some(id) => self.list.get_mut(id),
            None => {
                trace!(table = %self.name, global_port, remote = %remote, "Ingress not found");
                self.events.record(
                    &SessionEvent::new(miss, &self.name, *remote.ip(), remote.port())
                        .global_port(global_port),
                );
                None
            }
        }
    }

    /// Remove a session from the list, both indices and the port pool.
    fn evict(&mut self, id: SlotId) {
        let Some(entry) = self.list.unlink(id) else {
            return;
        };

        let local = self.locals.remove(&V::local_key(entry.local(), entry.remote()));
        let remote = self
            .remotes
            .remove(&V::remote_key(entry.global_port(), entry.remote()));
        debug_assert_eq!(local, Some(id), "local index out of sync in {}", self.name);
        debug_assert_eq!(remote, Some(id), "remote index out of sync in {}", self.name);
        self.variant.release_port(entry.global_port());
        self.check_invariants();

        debug!(
            table = %self.name,
            local = %entry.local(),
            remote = %entry.remote(),
            global_port = entry.global_port(),
            size = self.list.len(),
            "Session deleted"
        );
        self.events.record(
            &SessionEvent::new(
                EventKind::Delete,
                &self.name,
                entry.remote_addr(),
                entry.remote_port(),
            )
            .local(entry.local_addr(), entry.local_port())
            .global_port(entry.global_port())
            .counters(DeleteCounters {
                create: entry.created_at(),
                last_access: entry.last_access(),
                packets_sent: entry.packets_sent,
                packets_received: entry.packets_received,
                bytes_sent: entry.bytes_sent,
                bytes_received: entry.bytes_received,
            })
            .table_size(self.list.len()),
        );
    }

    fn check_invariants(&self) {
        debug_assert_eq!(self.locals.len(), self.list.len(), "local index size in {}", self.name);
        debug_assert_eq!(self.remotes.len(), self.list.len(), "remote index size in {}", self.name);
    }
}

impl<V: Variant> SessionTable for NatTable<V> {
    fn name(&self) -> &str {
        NatTable::name(self)
    }

    fn kind(&self) -> NatKind {
        V::KIND
    }

    fn idle_timeout(&self) -> u64 {
        NatTable::idle_timeout(self)
    }

    fn lookup_egress(&mut self, local: SocketAddrV4, remote: SocketAddrV4) -> Option<&mut Entry> {
        NatTable::lookup_egress(self, local, remote)
    }

    fn lookup_ingress(&mut self, global_port: u16, remote: SocketAddrV4) -> Option<&mut Entry> {
        NatTable::lookup_ingress(self, global_port, remote)
    }

    fn icmp_lookup_ingress(
        &mut self,
        global_port: u16,
        remote: SocketAddrV4,
    ) -> Option<&mut Entry> {
        NatTable::icmp_lookup_ingress(self, global_port, remote)
    }

    fn gc(&mut self) -> usize {
        NatTable::gc(self)
    }

    fn len(&self) -> usize {
        NatTable::len(self)
    }

    fn is_empty(&self) -> bool {
        NatTable::is_empty(self)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = &Entry> + '_> {
        Box::new(self.iter())
    }
}

/// Build a table of the given kind over `ports`.
pub fn build_table(
    name: &str,
    kind: NatKind,
    idle_timeout: u64,
    ports: PortSet,
    events: Arc<EventLog>,
    clock: Arc<dyn Clock>,
) -> Box<dyn SessionTable> {
    match kind {
        NatKind::FullCone => Box::new(
            NatTable::new(name, idle_timeout, FullCone::new(ports))
                .with_event_log(events)
                .with_clock(clock),
        ),
        NatKind::RestrictedCone => Box::new(
            NatTable::new(name, idle_timeout, RestrictedCone::new(PortProbe::new(ports)))
                .with_event_log(events)
                .with_clock(clock),
        ),
        NatKind::PortRestrictedCone => Box::new(
            NatTable::new(name, idle_timeout, PortRestrictedCone::new(PortProbe::new(ports)))
                .with_event_log(events)
                .with_clock(clock),
        ),
        NatKind::Symmetric => Box::new(
            NatTable::new(name, idle_timeout, Symmetric::new(PortProbe::new(ports)))
                .with_event_log(events)
                .with_clock(clock),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::clock::ManualClock;
    use std::net::Ipv4Addr;

    fn sock(a: [u8; 4], port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from(a), port)
    }

    fn table<V: Variant>(variant: V, idle_timeout: u64) -> (NatTable<V>, ManualClock) {
        let clock = ManualClock::new(1000);
        let table = NatTable::new("test", idle_timeout, variant).with_clock(Arc::new(clock.clone()));
        (table, clock)
    }

    fn symmetric(lo: u16, hi: u16) -> Symmetric {
        Symmetric::new(PortProbe::with_seed(PortSet::range(lo, hi), 11))
    }

    fn order<V: Variant>(table: &NatTable<V>) -> Vec<u16> {
        table.iter().map(|e| e.local_port()).collect()
    }

    #[test]
    fn test_egress_creates_session() {
        let (mut table, _) = table(symmetric(9000, 9099), 30);
        let local = sock([10, 0, 0, 2], 5000);
        let remote = sock([198, 51, 100, 1], 80);

        let entry = table.lookup_egress(local, remote).unwrap();
        assert_eq!(entry.local(), local);
        assert_eq!(entry.remote(), remote);
        assert!((9000..=9099).contains(&entry.global_port()));
        assert_eq!(entry.created_at(), 1000);
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }

    #[test]
    fn test_egress_refresh_keeps_port_and_moves_to_tail() {
        let (mut table, clock) = table(symmetric(9000, 9099), 30);
        let remote = sock([198, 51, 100, 1], 80);

        let first = table.lookup_egress(sock([10, 0, 0, 2], 1), remote).unwrap().global_port();
        table.lookup_egress(sock([10, 0, 0, 2], 2), remote).unwrap();
        assert_eq!(order(&table), vec![1, 2]);

        clock.advance(5);
        let again = table.lookup_egress(sock([10, 0, 0, 2], 1), remote).unwrap();
        assert_eq!(again.global_port(), first);
        assert_eq!(again.last_access(), 1005);
        assert_eq!(again.created_at(), 1000);
        assert_eq!(order(&table), vec![2, 1]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_ingress_does_not_refresh() {
        let (mut table, clock) = table(symmetric(9000, 9099), 30);
        let local = sock([10, 0, 0, 2], 5000);
        let remote = sock([198, 51, 100, 1], 80);
        let port = table.lookup_egress(local, remote).unwrap().global_port();

        clock.advance(10);
        let entry = table.lookup_ingress(port, remote).unwrap();
        assert_eq!(entry.local(), local);
        assert_eq!(entry.last_access(), 1000);
    }

    #[test]
    fn test_ingress_miss() {
        let (mut table, _) = table(symmetric(9000, 9099), 30);
        assert!(table.lookup_ingress(9000, sock([198, 51, 100, 1], 80)).is_none());
        assert!(table.icmp_lookup_ingress(9000, sock([198, 51, 100, 1], 0)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_gc_evicts_oldest_first_and_stops() {
        let (mut table, clock) = table(symmetric(9000, 9099), 30);
        let remote = sock([198, 51, 100, 1], 80);

        table.lookup_egress(sock([10, 0, 0, 2], 1), remote);
        clock.advance(10);
        table.lookup_egress(sock([10, 0, 0, 2], 2), remote);
        clock.advance(10);
        table.lookup_egress(sock([10, 0, 0, 2], 3), remote);

        // now = 1020; idle boundary is 990, nothing expired
        assert_eq!(table.gc(), 0);

        // now = 1031: only the first (last_access 1000) is older than 1001
        clock.advance(11);
        assert_eq!(table.gc(), 1);
        assert_eq!(order(&table), vec![2, 3]);

        // last_access == now - idle_timeout is kept
        clock.set(1040);
        assert_eq!(table.gc(), 0);
        clock.set(1041);
        assert_eq!(table.gc(), 1);
        assert_eq!(order(&table), vec![3]);
    }

    #[test]
    fn test_refreshed_session_survives_gc() {
        let (mut table, clock) = table(symmetric(9000, 9099), 30);
        let remote = sock([198, 51, 100, 1], 80);
        table.lookup_egress(sock([10, 0, 0, 2], 1), remote);
        table.lookup_egress(sock([10, 0, 0, 2], 2), remote);

        clock.advance(25);
        table.lookup_egress(sock([10, 0, 0, 2], 1), remote);
        clock.advance(10);

        assert_eq!(table.gc(), 1);
        assert_eq!(order(&table), vec![1]);
    }

    #[test]
    fn test_gc_runs_before_allocation() {
        let (mut table, clock) = table(FullCone::new(PortSet::range(9000, 9000)), 30);
        let remote = sock([198, 51, 100, 1], 80);

        assert_eq!(table.lookup_egress(sock([10, 0, 0, 2], 1), remote).unwrap().global_port(), 9000);
        assert!(table.lookup_egress(sock([10, 0, 0, 3], 1), remote).is_none());

        clock.advance(31);
        let entry = table.lookup_egress(sock([10, 0, 0, 3], 1), remote).unwrap();
        assert_eq!(entry.global_port(), 9000);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_eviction_clears_both_indices() {
        let (mut table, clock) = table(symmetric(9000, 9099), 30);
        let local = sock([10, 0, 0, 2], 5000);
        let remote = sock([198, 51, 100, 1], 80);
        let port = table.lookup_egress(local, remote).unwrap().global_port();

        clock.advance(31);
        assert_eq!(table.gc(), 1);
        assert!(table.lookup_ingress(port, remote).is_none());
        assert!(table.locals.is_empty());
        assert!(table.remotes.is_empty());
    }

    #[test]
    fn test_sticky_hint_survives_eviction() {
        let variant = PortRestrictedCone::new(PortProbe::with_seed(PortSet::range(9000, 9999), 5));
        let (mut table, clock) = table(variant, 30);
        let local = sock([10, 0, 0, 2], 5000);

        let port = table
            .lookup_egress(local, sock([198, 51, 100, 1], 80))
            .unwrap()
            .global_port();

        clock.advance(31);
        table.gc();
        assert!(table.is_empty());
        assert_eq!(table.last_assigned.get(&local), Some(&port));

        let again = table.lookup_egress(local, sock([198, 51, 100, 2], 443)).unwrap();
        assert_eq!(again.global_port(), port);
    }

    #[test]
    fn test_restricted_cone_shares_session_across_remote_ports() {
        let variant = RestrictedCone::new(PortProbe::with_seed(PortSet::range(9000, 9999), 5));
        let (mut table, _) = table(variant, 30);
        let local = sock([10, 0, 0, 2], 5000);

        let port = table
            .lookup_egress(local, sock([198, 51, 100, 1], 80))
            .unwrap()
            .global_port();
        let same = table
            .lookup_egress(local, sock([198, 51, 100, 1], 8080))
            .unwrap()
            .global_port();

        assert_eq!(port, same);
        assert_eq!(table.len(), 1);
        // Any port of the remote host may answer
        assert!(table.lookup_ingress(port, sock([198, 51, 100, 1], 12345)).is_some());
        assert!(table.lookup_ingress(port, sock([198, 51, 100, 9], 80)).is_none());
    }

    #[test]
    fn test_restricted_cone_sticky_across_hosts() {
        let variant = RestrictedCone::new(PortProbe::with_seed(PortSet::range(9000, 9999), 5));
        let (mut table, _) = table(variant, 30);
        let local = sock([10, 0, 0, 2], 5000);

        let port = table
            .lookup_egress(local, sock([198, 51, 100, 1], 80))
            .unwrap()
            .global_port();
        let other = table
            .lookup_egress(local, sock([198, 51, 100, 2], 80))
            .unwrap()
            .global_port();

        assert_eq!(port, other);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_sticky_collision_picks_another_port() {
        let variant = PortRestrictedCone::new(PortProbe::with_seed(PortSet::range(9000, 9001), 5));
        let (mut table, _) = table(variant, 30);
        let remote = sock([198, 51, 100, 1], 80);

        let a = table.lookup_egress(sock([10, 0, 0, 2], 5000), remote).unwrap().global_port();
        // A different local endpoint towards the same remote cannot share a port
        let b = table.lookup_egress(sock([10, 0, 0, 3], 5000), remote).unwrap().global_port();
        assert_ne!(a, b);

        // Both ports are now taken towards this remote
        assert!(table.lookup_egress(sock([10, 0, 0, 4], 5000), remote).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_event_log_records_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let events = Arc::new(EventLog::open(&path));
        let clock = ManualClock::new(0);
        let mut table = NatTable::new("udp", 30, FullCone::new(PortSet::range(9000, 9000)))
            .with_event_log(events)
            .with_clock(Arc::new(clock.clone()));
        let remote = sock([198, 51, 100, 1], 53);

        table.lookup_egress(sock([10, 0, 0, 2], 5000), remote).unwrap().record_sent(64);
        table.lookup_egress(sock([10, 0, 0, 3], 5000), remote);
        table.lookup_ingress(9999, remote);
        clock.advance(31);
        table.gc();

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let kinds: Vec<&str> = lines.iter().map(|l| l["event"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["insert", "no_empty_port", "ingress_not_found", "delete"]);
        assert_eq!(lines[0]["table_size"], 1);
        assert_eq!(lines[1]["table_size"], 1);
        assert_eq!(lines[3]["packets_sent"], 1);
        assert_eq!(lines[3]["bytes_sent"], 64);
        assert_eq!(lines[3]["table_size"], 0);
    }

    #[test]
    fn test_build_table_kinds() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        for kind in [
            NatKind::FullCone,
            NatKind::RestrictedCone,
            NatKind::PortRestrictedCone,
            NatKind::Symmetric,
        ] {
            let mut table = build_table(
                "tcp",
                kind,
                300,
                PortSet::range(9000, 9009),
                Arc::new(EventLog::disabled()),
                clock.clone(),
            );
            assert_eq!(table.kind(), kind);
            assert_eq!(table.name(), "tcp");
            assert_eq!(table.idle_timeout(), 300);
            assert!(table
                .lookup_egress(sock([10, 0, 0, 2], 1), sock([198, 51, 100, 1], 80))
                .is_some());
            assert_eq!(table.entries().count(), 1);
        }
    }
}
