//! Channel-backed medium

use super::Medium;
use crate::{Error, Result};
use tokio::sync::mpsc;

const DEPTH: usize = 256;

/// In-process medium. Datagrams injected through the paired [`MemoryPeer`]
/// are received by the NAT; datagrams the NAT sends come out of the peer.
#[derive(Debug)]
pub struct MemoryMedium {
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
}

/// Far end of a [`MemoryMedium`]
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::Sender<Vec<u8>>,
    outbound: mpsc::Receiver<Vec<u8>>,
}

impl MemoryMedium {
    pub fn new() -> (Self, MemoryPeer) {
        let (in_tx, in_rx) = mpsc::channel(DEPTH);
        let (out_tx, out_rx) = mpsc::channel(DEPTH);
        (
            Self {
                inbound: in_rx,
                outbound: out_tx,
            },
            MemoryPeer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }

    fn closed() -> Error {
        Error::Device {
            name: "memory".into(),
            reason: "peer closed".into(),
        }
    }
}

impl Medium for MemoryMedium {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let packet = self.inbound.recv().await.ok_or_else(Self::closed)?;
        if packet.len() > buf.len() {
            return Err(Error::InvalidPacket(format!(
                "datagram of {} bytes exceeds {} byte buffer",
                packet.len(),
                buf.len()
            )));
        }
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }

    async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        self.outbound
            .send(buf.to_vec())
            .await
            .map_err(|_| Self::closed())?;
        Ok(buf.len())
    }
}

impl MemoryPeer {
    /// Hand a datagram to the NAT.
    pub async fn inject(&self, packet: Vec<u8>) -> Result<()> {
        self.inbound
            .send(packet)
            .await
            .map_err(|_| MemoryMedium::closed())
    }

    /// Next datagram written by the NAT, `None` once the medium is gone.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.outbound.recv().await
    }

    /// A datagram written by the NAT, if one is already queued.
    pub fn try_next(&mut self) -> Option<Vec<u8>> {
        self.outbound.try_recv().ok()
    }
}
