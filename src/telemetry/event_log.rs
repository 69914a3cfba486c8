//! Session event log
//!
//! Append-only JSON lines describing session lifecycle, one object per line:
//!
//! ```text
//! {"at":1700000000,"event":"insert","table":"udp","local_addr":"10.0.0.2",...}
//! ```
//!
//! The file is opened lazily on first write and closed by [`EventLog::reopen`],
//! so an external rotation followed by a reload signal moves writes to the
//! new file. Every failure is swallowed: logging never affects translation.

use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Session lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Insert,
    Delete,
    NoEmptyPort,
    IngressNotFound,
    IcmpIngressNotFound,
}

/// Final counters of an evicted session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteCounters {
    pub create: u64,
    pub last_access: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub at: i64,
    pub event: EventKind,
    pub table: String,
    pub local_addr: Option<Ipv4Addr>,
    pub local_port: Option<u16>,
    pub global_port: Option<u16>,
    pub remote_addr: Ipv4Addr,
    pub remote_port: u16,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub counters: Option<DeleteCounters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_size: Option<usize>,
}

impl SessionEvent {
    pub fn new(event: EventKind, table: &str, remote_addr: Ipv4Addr, remote_port: u16) -> Self {
        Self {
            at: chrono::Utc::now().timestamp(),
            event,
            table: table.to_string(),
            local_addr: None,
            local_port: None,
            global_port: None,
            remote_addr,
            remote_port,
            counters: None,
            table_size: None,
        }
    }

    pub fn local(mut self, addr: Ipv4Addr, port: u16) -> Self {
        self.local_addr = Some(addr);
        self.local_port = Some(port);
        self
    }

    pub fn global_port(mut self, port: u16) -> Self {
        self.global_port = Some(port);
        self
    }

    pub fn counters(mut self, counters: DeleteCounters) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn table_size(mut self, size: usize) -> Self {
        self.table_size = Some(size);
        self
    }
}

/// Best-effort JSON lines sink
#[derive(Debug, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl EventLog {
    /// Sink that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Sink appending to `path`. Nothing is opened until the first event.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            file: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Append one event.
    pub fn record(&self, event: &SessionEvent) {
        let Some(path) = self.path.as_ref() else {
            return;
        };

        let mut line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to encode session event");
                return;
            }
        };
        line.push('\n');

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Event log unavailable");
                    return;
                }
            }
        }

        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(line.as_bytes()) {
                tracing::debug!(path = %path.display(), error = %e, "Event log write failed");
                *guard = None;
            }
        }
    }

    /// Close the current file; the next event opens `path` again.
    pub fn reopen(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        if let Some(path) = self.path.as_ref() {
            tracing::info!(path = %path.display(), "Event log reopened");
        }
    }
}
