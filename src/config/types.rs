//! Configuration types

use crate::dataplane::{MapEProfile, NatKind, PortSet};
use crate::telemetry::LogConfig;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// User-defined configuration (rat.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the private side is translated to
    pub global_addr: Ipv4Addr,
    #[serde(default)]
    pub tun: TunConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub tables: TablesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunConfig {
    #[serde(default = "default_tun_name")]
    pub name: String,
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

fn default_tun_name() -> String {
    "rat".to_string()
}

fn default_mtu() -> u16 {
    1500
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            name: default_tun_name(),
            mtu: default_mtu(),
        }
    }
}

/// Session event log. Disabled without a path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventLogConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Seconds between gc passes over every table, 0 disables
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    10
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TablesConfig {
    #[serde(default)]
    pub tcp: TableConfig,
    #[serde(default)]
    pub udp: TableConfig,
    #[serde(default)]
    pub icmp_echo: TableConfig,
}

/// One table as written by the user; unset fields take per-table defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableConfig {
    pub variant: Option<NatKind>,
    pub idle_timeout: Option<u64>,
    pub ports: Option<PortsConfig>,
}

/// Global port set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortsConfig {
    /// Inclusive `[lo, hi]`
    Range([u16; 2]),
    List(Vec<u16>),
    MapE { profile: MapEProfile, psid: u16 },
}

impl PortsConfig {
    pub fn port_set(&self) -> PortSet {
        match self {
            PortsConfig::Range([lo, hi]) => PortSet::range(*lo, *hi),
            PortsConfig::List(ports) => PortSet::list(ports.iter().copied()),
            PortsConfig::MapE { profile, psid } => PortSet::map_e(*profile, *psid),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        PortsConfig::Range([9000, 9999])
    }
}

// ============================================================================
// Resolved settings (all defaults filled in)
// ============================================================================

/// Which of the three tables a setting belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableClass {
    Tcp,
    Udp,
    IcmpEcho,
}

impl TableClass {
    pub const ALL: [TableClass; 3] = [TableClass::Tcp, TableClass::Udp, TableClass::IcmpEcho];

    pub fn name(self) -> &'static str {
        match self {
            TableClass::Tcp => "tcp",
            TableClass::Udp => "udp",
            TableClass::IcmpEcho => "icmp_echo",
        }
    }

    pub fn default_variant(self) -> NatKind {
        match self {
            TableClass::Tcp | TableClass::Udp => NatKind::RestrictedCone,
            TableClass::IcmpEcho => NatKind::Symmetric,
        }
    }

    pub fn default_idle_timeout(self) -> u64 {
        match self {
            TableClass::Tcp => 300,
            TableClass::Udp | TableClass::IcmpEcho => 30,
        }
    }
}

/// A table with every default applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSettings {
    pub name: String,
    pub variant: NatKind,
    pub idle_timeout: u64,
    pub ports: PortsConfig,
}

impl TableConfig {
    pub fn resolve(&self, class: TableClass) -> TableSettings {
        TableSettings {
            name: class.name().to_string(),
            variant: self.variant.unwrap_or(class.default_variant()),
            idle_timeout: self.idle_timeout.unwrap_or(class.default_idle_timeout()),
            ports: self.ports.clone().unwrap_or_default(),
        }
    }
}

impl TablesConfig {
    pub fn get(&self, class: TableClass) -> &TableConfig {
        match class {
            TableClass::Tcp => &self.tcp,
            TableClass::Udp => &self.udp,
            TableClass::IcmpEcho => &self.icmp_echo,
        }
    }

    /// Settings for tcp, udp and icmp_echo, in that order.
    pub fn resolved(&self) -> [TableSettings; 3] {
        TableClass::ALL.map(|class| self.get(class).resolve(class))
    }
}
