//! Full packet loop over an in-memory medium

use rat::config;
use rat::medium::{MemoryMedium, MemoryPeer};
use rat::protocol::{EchoKind, Ipv4Packet, Transport, PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use rat::service::{NatService, StatusHandle};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const GLOBAL: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
const LAN_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const LAN_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);
const PEER_1: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);
const PEER_2: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 9);

fn udp(src: Ipv4Addr, src_port: u16, dst: Ipv4Addr, dst_port: u16) -> Vec<u8> {
    let mut l4 = vec![0u8; 8];
    l4[0..2].copy_from_slice(&src_port.to_be_bytes());
    l4[2..4].copy_from_slice(&dst_port.to_be_bytes());
    l4[4..6].copy_from_slice(&8u16.to_be_bytes());
    l4[6] = 0xFF; // non-zero so it gets recomputed
    Ipv4Packet::new(src, dst, PROTO_UDP, &l4).into_bytes()
}

fn tcp(src: Ipv4Addr, src_port: u16, dst: Ipv4Addr, dst_port: u16) -> Vec<u8> {
    let mut l4 = vec![0u8; 20];
    l4[0..2].copy_from_slice(&src_port.to_be_bytes());
    l4[2..4].copy_from_slice(&dst_port.to_be_bytes());
    l4[12] = 0x50;
    l4[13] = 0x02;
    Ipv4Packet::new(src, dst, PROTO_TCP, &l4).into_bytes()
}

fn echo(src: Ipv4Addr, dst: Ipv4Addr, kind: u8, identifier: u16) -> Vec<u8> {
    let mut l4 = vec![kind, 0, 0, 0, 0, 0, 0, 1];
    l4[4..6].copy_from_slice(&identifier.to_be_bytes());
    Ipv4Packet::new(src, dst, PROTO_ICMP, &l4).into_bytes()
}

struct Harness {
    peer: MemoryPeer,
    status: StatusHandle,
    stop: oneshot::Sender<()>,
    task: JoinHandle<rat::Result<()>>,
}

impl Harness {
    fn start(toml: &str) -> Self {
        let cfg = config::parse(toml).unwrap();
        assert!(!config::validate(&cfg).has_errors());

        let (medium, peer) = MemoryMedium::new();
        let (service, status) = NatService::from_config(&cfg, medium);
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(service.run(async {
            let _ = stop_rx.await;
        }));
        Self {
            peer,
            status,
            stop,
            task,
        }
    }

    async fn send(&mut self, packet: Vec<u8>) -> Option<Ipv4Packet> {
        self.peer.inject(packet).await.unwrap();
        // A status round trip guarantees the packet has been processed
        self.status.snapshot().await.unwrap();
        self.peer
            .try_next()
            .map(|bytes| Ipv4Packet::from_vec(bytes).unwrap())
    }

    async fn stop(self) {
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

fn base_config(extra: &str) -> String {
    format!("global_addr = \"{}\"\n{}", GLOBAL, extra)
}

#[tokio::test]
async fn test_restricted_cone_round_trip() {
    let mut nat = Harness::start(&base_config(""));

    let out = nat.send(udp(LAN_A, 5000, PEER_1, 53)).await.unwrap();
    assert_eq!(out.src_addr(), GLOBAL);
    let Transport::Udp { src_port: global_port, .. } = out.transport().unwrap() else {
        panic!("expected UDP");
    };
    assert!((9000..=9999).contains(&global_port));

    // Same host, other port: allowed by restricted cone
    let back = nat.send(udp(PEER_1, 5353, GLOBAL, global_port)).await.unwrap();
    assert_eq!(back.dst_addr(), LAN_A);
    assert_eq!(
        back.transport().unwrap(),
        Transport::Udp {
            src_port: 5353,
            dst_port: 5000
        }
    );

    // Other host: dropped
    assert!(nat.send(udp(PEER_2, 53, GLOBAL, global_port)).await.is_none());

    let snapshot = nat.status.snapshot().await.unwrap();
    assert_eq!(snapshot.global_addr, GLOBAL);
    let udp_table = snapshot.table("udp").unwrap();
    assert_eq!(udp_table.size, 1);
    assert_eq!(udp_table.entries[0].packets_received, 1);
    assert_eq!(snapshot.metrics.get("ingress_misses"), Some(1));

    nat.stop().await;
}

#[tokio::test]
async fn test_tables_are_independent_per_protocol() {
    let mut nat = Harness::start(&base_config(
        r#"
[tables.tcp]
variant = "symmetric"
ports = { list = [9100] }

[tables.udp]
variant = "full_cone"
ports = { list = [9100] }

[tables.icmp_echo]
ports = { list = [9100] }
"#,
    ));

    let t = nat.send(tcp(LAN_A, 40000, PEER_1, 443)).await.unwrap();
    let u = nat.send(udp(LAN_B, 40000, PEER_1, 53)).await.unwrap();
    let i = nat.send(echo(LAN_A, PEER_1, 8, 77)).await.unwrap();

    assert!(matches!(t.transport().unwrap(), Transport::Tcp { src_port: 9100, .. }));
    assert!(matches!(u.transport().unwrap(), Transport::Udp { src_port: 9100, .. }));
    assert_eq!(
        i.transport().unwrap(),
        Transport::IcmpEcho {
            kind: EchoKind::Request,
            identifier: 9100
        }
    );

    let reply = nat.send(echo(PEER_1, GLOBAL, 0, 9100)).await.unwrap();
    assert_eq!(reply.dst_addr(), LAN_A);
    assert_eq!(
        reply.transport().unwrap(),
        Transport::IcmpEcho {
            kind: EchoKind::Reply,
            identifier: 77
        }
    );

    // Full cone UDP accepts any remote once mapped
    let inbound = nat.send(udp(PEER_2, 1234, GLOBAL, 9100)).await.unwrap();
    assert_eq!(inbound.dst_addr(), LAN_B);

    // The single UDP port is taken
    assert!(nat.send(udp(LAN_A, 1, PEER_2, 53)).await.is_none());

    let snapshot = nat.status.snapshot().await.unwrap();
    for name in ["tcp", "udp", "icmp_echo"] {
        assert_eq!(snapshot.table(name).unwrap().size, 1, "{}", name);
    }
    assert_eq!(snapshot.metrics.get("no_empty_port"), Some(1));

    nat.stop().await;
}

fn read_events(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_event_log_and_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let mut nat = Harness::start(&base_config(&format!(
        r#"
[event_log]
path = "{}"

[sweep]
interval_secs = 1

[tables.udp]
idle_timeout = 1
"#,
        path.display()
    )));

    let out = nat.send(udp(LAN_A, 5000, PEER_1, 53)).await.unwrap();
    let Transport::Udp { src_port, .. } = out.transport().unwrap() else {
        panic!("expected UDP");
    };
    assert!(nat.send(echo(PEER_1, GLOBAL, 0, 4242)).await.is_none());

    // Monotonic clock: idle after more than one full second, then swept
    let mut swept = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = nat.status.snapshot().await.unwrap();
        if snapshot.table("udp").unwrap().size == 0 {
            swept = true;
            break;
        }
    }
    assert!(swept, "idle UDP session was not swept");

    let events = read_events(&path);
    let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["insert", "icmp_ingress_not_found", "delete"]);

    assert_eq!(events[0]["table"], "udp");
    assert_eq!(events[0]["local_addr"], "10.0.0.2");
    assert_eq!(events[0]["local_port"], 5000);
    assert_eq!(events[0]["global_port"], src_port);
    assert_eq!(events[2]["packets_sent"], 1);
    assert_eq!(events[2]["table_size"], 0);

    nat.stop().await;
}
