//! IPv4 packets as seen on the TUN device - RFC 791
//!
//! [`Ipv4Packet`] owns the datagram, exposes the address/port fields the
//! translator rewrites, and recomputes every checksum in [`Ipv4Packet::apply`].

use super::checksum::{internet_checksum, pseudo_header_checksum};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;
const ICMP_ECHO_HEADER: usize = 8;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;

/// Direction of an ICMP echo message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoKind {
    Request,
    Reply,
}

/// Transport view of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp { src_port: u16, dst_port: u16 },
    Udp { src_port: u16, dst_port: u16 },
    /// Echo identifier stands in for a port
    IcmpEcho { kind: EchoKind, identifier: u16 },
    /// Other protocols, other ICMP types and fragments
    Other { protocol: u8 },
}

/// Owned, mutable IPv4 datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Packet {
    buffer: Vec<u8>,
    header_len: usize,
}

impl Ipv4Packet {
    /// Parse a datagram, copying it. Trailing bytes past the IPv4 total
    /// length are discarded.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_vec(data.to_vec())
    }

    pub fn from_vec(mut buffer: Vec<u8>) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 packet too short".into()));
        }
        if buffer[0] >> 4 != 4 {
            return Err(Error::Parse("not an IPv4 packet".into()));
        }

        let header_len = usize::from(buffer[0] & 0x0F) * 4;
        if header_len < MIN_HEADER_SIZE || buffer.len() < header_len {
            return Err(Error::Parse("IPv4 header truncated".into()));
        }

        let total_length = usize::from(u16::from_be_bytes([buffer[2], buffer[3]]));
        if total_length < header_len || total_length > buffer.len() {
            return Err(Error::Parse(format!(
                "IPv4 total length {} does not fit {} bytes",
                total_length,
                buffer.len()
            )));
        }
        buffer.truncate(total_length);

        Ok(Self { buffer, header_len })
    }

    /// Build a datagram around a transport payload. Checksums are filled in.
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload: &[u8]) -> Self {
        let total = MIN_HEADER_SIZE + payload.len();
        let mut buffer = vec![0u8; total];
        buffer[0] = 0x45;
        buffer[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        buffer[6] = 0x40; // DF
        buffer[8] = 64;
        buffer[9] = protocol;
        buffer[12..16].copy_from_slice(&src.octets());
        buffer[16..20].copy_from_slice(&dst.octets());
        buffer[MIN_HEADER_SIZE..].copy_from_slice(payload);

        let mut packet = Self {
            buffer,
            header_len: MIN_HEADER_SIZE,
        };
        packet.apply();
        packet
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.buffer[12], self.buffer[13], self.buffer[14], self.buffer[15])
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.buffer[16], self.buffer[17], self.buffer[18], self.buffer[19])
    }

    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.buffer[12..16].copy_from_slice(&addr.octets());
    }

    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) {
        self.buffer[16..20].copy_from_slice(&addr.octets());
    }

    pub fn header_checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    /// More-fragments set or non-zero offset
    pub fn is_fragment(&self) -> bool {
        let more_fragments = self.buffer[6] & 0x20 != 0;
        let offset = u16::from_be_bytes([self.buffer[6] & 0x1F, self.buffer[7]]);
        more_fragments || offset != 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.header_len..]
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Transport fields relevant to translation.
    pub fn transport(&self) -> Result<Transport> {
        let protocol = self.protocol();
        if self.is_fragment() {
            return Ok(Transport::Other { protocol });
        }

        let l4 = self.payload();
        let port_at = |i: usize| u16::from_be_bytes([l4[i], l4[i + 1]]);

        match protocol {
            PROTO_TCP => {
                if l4.len() < TCP_MIN_HEADER {
                    return Err(Error::Parse("TCP header truncated".into()));
                }
                Ok(Transport::Tcp {
                    src_port: port_at(0),
                    dst_port: port_at(2),
                })
            }
            PROTO_UDP => {
                if l4.len() < UDP_HEADER {
                    return Err(Error::Parse("UDP header truncated".into()));
                }
                Ok(Transport::Udp {
                    src_port: port_at(0),
                    dst_port: port_at(2),
                })
            }
            PROTO_ICMP => {
                if l4.len() < ICMP_ECHO_HEADER {
                    return Err(Error::Parse("ICMP header truncated".into()));
                }
                let kind = match l4[0] {
                    ICMP_ECHO_REQUEST => EchoKind::Request,
                    ICMP_ECHO_REPLY => EchoKind::Reply,
                    _ => return Ok(Transport::Other { protocol }),
                };
                Ok(Transport::IcmpEcho {
                    kind,
                    identifier: port_at(4),
                })
            }
            _ => Ok(Transport::Other { protocol }),
        }
    }

    /// Rewrite the TCP/UDP source port.
    pub fn set_src_port(&mut self, port: u16) -> Result<()> {
        self.set_port_at(0, port)
    }

    /// Rewrite the TCP/UDP destination port.
    pub fn set_dst_port(&mut self, port: u16) -> Result<()> {
        self.set_port_at(2, port)
    }

    /// Rewrite the ICMP echo identifier.
    pub fn set_icmp_identifier(&mut self, identifier: u16) -> Result<()> {
        match self.transport()? {
            Transport::IcmpEcho { .. } => {
                self.payload_mut()[4..6].copy_from_slice(&identifier.to_be_bytes());
                Ok(())
            }
            _ => Err(Error::InvalidPacket("not an ICMP echo message".into())),
        }
    }

    fn set_port_at(&mut self, offset: usize, port: u16) -> Result<()> {
        match self.transport()? {
            Transport::Tcp { .. } | Transport::Udp { .. } => {
                self.payload_mut()[offset..offset + 2].copy_from_slice(&port.to_be_bytes());
                Ok(())
            }
            _ => Err(Error::InvalidPacket("packet has no ports".into())),
        }
    }

    /// Recompute the header checksum and, for unfragmented TCP, UDP and
    /// ICMP, the transport checksum.
    pub fn apply(&mut self) {
        self.buffer[10..12].fill(0);
        let sum = internet_checksum(&self.buffer[..self.header_len]);
        self.buffer[10..12].copy_from_slice(&sum.to_be_bytes());

        if self.is_fragment() {
            return;
        }

        let (src, dst, protocol) = (self.src_addr(), self.dst_addr(), self.protocol());
        let l4 = self.payload_mut();
        match protocol {
            PROTO_TCP if l4.len() >= TCP_MIN_HEADER => {
                l4[16..18].fill(0);
                let sum = pseudo_header_checksum(src, dst, protocol, l4);
                l4[16..18].copy_from_slice(&sum.to_be_bytes());
            }
            PROTO_UDP if l4.len() >= UDP_HEADER => {
                // Zero means the sender did not compute one
                if l4[6..8] == [0, 0] {
                    return;
                }
                l4[6..8].fill(0);
                let sum = match pseudo_header_checksum(src, dst, protocol, l4) {
                    0 => 0xFFFF,
                    sum => sum,
                };
                l4[6..8].copy_from_slice(&sum.to_be_bytes());
            }
            PROTO_ICMP if l4.len() >= 4 => {
                l4[2..4].fill(0);
                let sum = internet_checksum(l4);
                l4[2..4].copy_from_slice(&sum.to_be_bytes());
            }
            _ => {}
        }
    }
}
