//! Packet translation between the private side and the global address
//!
//! A packet addressed to the global address is ingress, anything else is
//! egress. TCP and UDP are translated by port, ICMP echo by identifier
//! (with the remote port fixed at 0). Everything else is dropped.

use super::nat_table::SessionTable;
use crate::protocol::{EchoKind, Ipv4Packet, Transport};
use crate::telemetry::NatMetrics;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tracing::trace;

/// Outcome of translating one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateResult {
    /// Rewritten packet, ready to be written back
    Translated(Vec<u8>),
    /// Egress packet dropped, no global port available
    NoEmptyPort,
    /// Ingress packet dropped, no matching session
    NoSession,
    /// Protocol, ICMP type or fragment the translator does not handle
    Unsupported,
    /// Packet failed to parse
    Malformed,
}

enum Direction {
    Egress,
    Ingress,
}

/// Owns the three session tables and rewrites packets through them.
pub struct Translator {
    global_addr: Ipv4Addr,
    tcp: Box<dyn SessionTable>,
    udp: Box<dyn SessionTable>,
    icmp_echo: Box<dyn SessionTable>,
    metrics: Arc<NatMetrics>,
}

impl Translator {
    pub fn new(
        global_addr: Ipv4Addr,
        tcp: Box<dyn SessionTable>,
        udp: Box<dyn SessionTable>,
        icmp_echo: Box<dyn SessionTable>,
        metrics: Arc<NatMetrics>,
    ) -> Self {
        Self {
            global_addr,
            tcp,
            udp,
            icmp_echo,
            metrics,
        }
    }

    pub fn global_addr(&self) -> Ipv4Addr {
        self.global_addr
    }

    pub fn metrics(&self) -> &Arc<NatMetrics> {
        &self.metrics
    }

    /// Tables in tcp, udp, icmp_echo order.
    pub fn tables(&self) -> [&dyn SessionTable; 3] {
        [&*self.tcp, &*self.udp, &*self.icmp_echo]
    }

    /// Translate one IPv4 datagram.
    pub fn transform(&mut self, bytes: &[u8]) -> TranslateResult {
        self.metrics.packets_in.inc();

        let mut packet = match Ipv4Packet::from_bytes(bytes) {
            Ok(p) => p,
            Err(e) => return self.malformed(e),
        };
        let transport = match packet.transport() {
            Ok(t) => t,
            Err(e) => return self.malformed(e),
        };

        let ingress = packet.dst_addr() == self.global_addr;
        let direction = if ingress {
            Direction::Ingress
        } else {
            Direction::Egress
        };

        let result = match (direction, transport) {
            (Direction::Egress, Transport::Tcp { src_port, dst_port }) => {
                Self::egress(
                    &mut *self.tcp,
                    self.global_addr,
                    &mut packet,
                    src_port,
                    dst_port,
                    false,
                )
            }
            (Direction::Egress, Transport::Udp { src_port, dst_port }) => {
                Self::egress(
                    &mut *self.udp,
                    self.global_addr,
                    &mut packet,
                    src_port,
                    dst_port,
                    false,
                )
            }
            (
                Direction::Egress,
                Transport::IcmpEcho {
                    kind: EchoKind::Request,
                    identifier,
                },
            ) => Self::egress(
                &mut *self.icmp_echo,
                self.global_addr,
                &mut packet,
                identifier,
                0,
                true,
            ),
            (Direction::Ingress, Transport::Tcp { src_port, dst_port }) => {
                Self::ingress(&mut *self.tcp, &mut packet, dst_port, src_port, false)
            }
            (Direction::Ingress, Transport::Udp { src_port, dst_port }) => {
                Self::ingress(&mut *self.udp, &mut packet, dst_port, src_port, false)
            }
            (
                Direction::Ingress,
                Transport::IcmpEcho {
                    kind: EchoKind::Reply,
                    identifier,
                },
            ) => Self::ingress(&mut *self.icmp_echo, &mut packet, identifier, 0, true),
            (_, other) => {
                trace!(
                    src = %packet.src_addr(),
                    dst = %packet.dst_addr(),
                    ?other,
                    "Unsupported packet"
                );
                TranslateResult::Unsupported
            }
        };

        self.count(&result, ingress);
        result
    }

    /// Run gc on every table, returning the number of evicted sessions.
    pub fn gc_all(&mut self) -> usize {
        let removed = self.tcp.gc() + self.udp.gc() + self.icmp_echo.gc();
        self.metrics.swept.add(removed as u64);
        removed
    }

    fn egress(
        table: &mut dyn SessionTable,
        global_addr: Ipv4Addr,
        packet: &mut Ipv4Packet,
        local_port: u16,
        remote_port: u16,
        icmp: bool,
    ) -> TranslateResult {
        let local = SocketAddrV4::new(packet.src_addr(), local_port);
        let remote = SocketAddrV4::new(packet.dst_addr(), remote_port);

        let Some(entry) = table.lookup_egress(local, remote) else {
            return TranslateResult::NoEmptyPort;
        };
        let global_port = entry.global_port();
        entry.record_sent(packet.len());

        packet.set_src_addr(global_addr);
        let rewritten = if icmp {
            packet.set_icmp_identifier(global_port)
        } else {
            packet.set_src_port(global_port)
        };
        if let Err(e) = rewritten {
            trace!(error = %e, "Egress rewrite failed");
            return TranslateResult::Malformed;
        }

        packet.apply();
        TranslateResult::Translated(packet.as_bytes().to_vec())
    }

    fn ingress(
        table: &mut dyn SessionTable,
        packet: &mut Ipv4Packet,
        global_port: u16,
        remote_port: u16,
        icmp: bool,
    ) -> TranslateResult {
        let remote = SocketAddrV4::new(packet.src_addr(), remote_port);

        let found = if icmp {
            table.icmp_lookup_ingress(global_port, remote)
        } else {
            table.lookup_ingress(global_port, remote)
        };
        let Some(entry) = found else {
            return TranslateResult::NoSession;
        };
        entry.record_received(packet.len());
        let local = entry.local();

        packet.set_dst_addr(*local.ip());
        let rewritten = if icmp {
            packet.set_icmp_identifier(local.port())
        } else {
            packet.set_dst_port(local.port())
        };
        if let Err(e) = rewritten {
            trace!(error = %e, "Ingress rewrite failed");
            return TranslateResult::Malformed;
        }

        packet.apply();
        TranslateResult::Translated(packet.as_bytes().to_vec())
    }

    fn malformed(&self, e: crate::Error) -> TranslateResult {
        trace!(error = %e, "Malformed packet");
        self.metrics.malformed.inc();
        TranslateResult::Malformed
    }

    fn count(&self, result: &TranslateResult, ingress: bool) {
        let m = &self.metrics;
        match result {
            TranslateResult::Translated(bytes) if ingress => {
                m.ingress_translated.inc();
                m.ingress_bytes.add(bytes.len() as u64);
            }
            TranslateResult::Translated(bytes) => {
                m.egress_translated.inc();
                m.egress_bytes.add(bytes.len() as u64);
            }
            TranslateResult::NoEmptyPort => m.no_empty_port.inc(),
            TranslateResult::NoSession => m.ingress_misses.inc(),
            TranslateResult::Unsupported => m.unsupported.inc(),
            TranslateResult::Malformed => m.malformed.inc(),
        }
    }
}
