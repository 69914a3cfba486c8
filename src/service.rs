//! NAT service loop
//!
//! One task owns the translator and every session table. It multiplexes:
//! - datagrams from the medium (translated and written back)
//! - the periodic sweep
//! - status requests from [`StatusHandle`]s
//! - SIGHUP (reopen the event log) and SIGUSR1 (log a status summary)
//! - the caller's shutdown future

use crate::config::Config;
use crate::dataplane::{
    build_table, Clock, Entry, MonotonicClock, NatKind, TranslateResult, Translator,
};
use crate::medium::Medium;
use crate::telemetry::{EventLog, MetricsSnapshot, NatMetrics};
use crate::{Error, Result};
use serde::Serialize;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Headroom over the MTU for the receive buffer
const BUFFER_SLACK: usize = 64;

/// Pause after a failed read so a persistently failing device does not spin
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

/// State of one table at snapshot time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    pub name: String,
    pub variant: NatKind,
    pub idle_timeout: u64,
    pub size: usize,
    /// Least recently used first
    pub entries: Vec<Entry>,
}

/// Consistent view of the whole NAT, taken inside the owning task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub global_addr: Ipv4Addr,
    pub tables: Vec<TableStatus>,
    pub metrics: MetricsSnapshot,
}

impl StatusSnapshot {
    pub fn capture(translator: &Translator) -> Self {
        let tables = translator
            .tables()
            .iter()
            .map(|table| TableStatus {
                name: table.name().to_string(),
                variant: table.kind(),
                idle_timeout: table.idle_timeout(),
                size: table.len(),
                entries: table.entries().cloned().collect(),
            })
            .collect();

        Self {
            global_addr: translator.global_addr(),
            tables,
            metrics: translator.metrics().export(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableStatus> {
        self.tables.iter().find(|t| t.name == name)
    }
}

type StatusRequest = oneshot::Sender<StatusSnapshot>;

/// Cloneable handle for querying a running [`NatService`]
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: mpsc::Sender<StatusRequest>,
}

impl StatusHandle {
    pub async fn snapshot(&self) -> Result<StatusSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(reply_tx)
            .await
            .map_err(|_| Error::ServiceStopped)?;
        reply_rx.await.map_err(|_| Error::ServiceStopped)
    }
}

/// Build the three tables described by `config`.
pub fn build_translator(
    config: &Config,
    events: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    metrics: Arc<NatMetrics>,
) -> Translator {
    let [tcp, udp, icmp_echo] = config.tables.resolved().map(|settings| {
        build_table(
            &settings.name,
            settings.variant,
            settings.idle_timeout,
            settings.ports.port_set(),
            events.clone(),
            clock.clone(),
        )
    });
    Translator::new(config.global_addr, tcp, udp, icmp_echo, metrics)
}

pub struct NatService<M: Medium> {
    medium: M,
    translator: Translator,
    events: Arc<EventLog>,
    sweep_interval: Option<Duration>,
    buffer_size: usize,
    status_rx: mpsc::Receiver<StatusRequest>,
}

impl<M: Medium> NatService<M> {
    pub fn new(medium: M, translator: Translator, events: Arc<EventLog>) -> (Self, StatusHandle) {
        let (tx, status_rx) = mpsc::channel(16);
        let service = Self {
            medium,
            translator,
            events,
            sweep_interval: Some(Duration::from_secs(10)),
            buffer_size: 1500 + BUFFER_SLACK,
            status_rx,
        };
        (service, StatusHandle { tx })
    }

    /// Service wired up from configuration, on the monotonic clock.
    pub fn from_config(config: &Config, medium: M) -> (Self, StatusHandle) {
        let events = Arc::new(match &config.event_log.path {
            Some(path) => EventLog::open(path),
            None => EventLog::disabled(),
        });
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let translator =
            build_translator(config, events.clone(), clock, Arc::new(NatMetrics::new()));

        let (service, handle) = Self::new(medium, translator, events);
        (
            service
                .with_sweep_interval(config.sweep.interval_secs)
                .with_mtu(config.tun.mtu),
            handle,
        )
    }

    /// Seconds between sweeps, 0 disables.
    pub fn with_sweep_interval(mut self, secs: u64) -> Self {
        self.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.buffer_size = usize::from(mtu) + BUFFER_SLACK;
        self
    }

    /// Process packets until `shutdown` completes or the medium fails.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut hangup = signal(SignalKind::hangup())?;
        let mut user1 = signal(SignalKind::user_defined1())?;
        let mut sweep = self.sweep_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut buf = vec![0u8; self.buffer_size];
        tokio::pin!(shutdown);

        info!(
            global_addr = %self.translator.global_addr(),
            sweep = ?self.sweep_interval,
            event_log = self.events.is_enabled(),
            "NAT started, processing packets..."
        );

        loop {
            // Ordered: packets queued before a status request are
            // reflected in its snapshot
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                result = self.medium.recv(&mut buf) => match result {
                    Ok(len) => self.handle_packet(&buf[..len]).await,
                    // Only a gone device ends the loop
                    Err(e @ Error::Device { .. }) => {
                        error!(error = %e, "Medium closed");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(error = %e, "Medium receive failed, continuing");
                        self.translator.metrics().recv_errors.inc();
                        tokio::time::sleep(RECV_RETRY_DELAY).await;
                    }
                },
                _ = next_tick(&mut sweep) => {
                    let removed = self.translator.gc_all();
                    if removed > 0 {
                        debug!(removed, "Sweep evicted idle sessions");
                    }
                }
                Some(reply) = self.status_rx.recv() => {
                    let _ = reply.send(StatusSnapshot::capture(&self.translator));
                }
                _ = hangup.recv() => {
                    debug!("SIGHUP received");
                    self.events.reopen();
                }
                _ = user1.recv() => {
                    self.log_summary();
                }
            }
        }

        Ok(())
    }

    async fn handle_packet(&mut self, packet: &[u8]) {
        match self.translator.transform(packet) {
            TranslateResult::Translated(out) => {
                if let Err(e) = self.medium.send(&out).await {
                    warn!(error = %e, len = out.len(), "Failed to write translated packet");
                }
            }
            dropped => trace!(len = packet.len(), result = ?dropped, "Packet dropped"),
        }
    }

    fn log_summary(&self) {
        let snapshot = StatusSnapshot::capture(&self.translator);
        for table in &snapshot.tables {
            info!(
                table = %table.name,
                variant = %table.variant,
                idle_timeout = table.idle_timeout,
                size = table.size,
                "Table status"
            );
        }
        info!(metrics = ?snapshot.metrics.0, "Translation counters");
    }
}

async fn next_tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
