//! Configuration validation

use super::{Config, PortsConfig, TableClass};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_global(config, &mut result);
    validate_tables(config, &mut result);
    validate_runtime(config, &mut result);

    result
}

fn validate_global(config: &Config, result: &mut ValidationResult) {
    let addr = config.global_addr;
    if addr.is_unspecified() || addr.is_broadcast() || addr.is_multicast() {
        result.error(format!("global_addr: {} is not a unicast address", addr));
    }
    if addr.is_private() {
        result.warn(format!("global_addr: {} is a private address", addr));
    }
}

fn validate_tables(config: &Config, result: &mut ValidationResult) {
    for class in TableClass::ALL {
        let name = class.name();
        let table = config.tables.get(class);
        let settings = table.resolve(class);

        if table.variant.is_none() {
            result.warn(format!(
                "tables.{}: variant not specified, using default {}",
                name, settings.variant
            ));
        }
        if table.idle_timeout.is_none() {
            result.warn(format!(
                "tables.{}: idle_timeout not specified, using default {}",
                name, settings.idle_timeout
            ));
        }
        if table.ports.is_none() {
            result.warn(format!(
                "tables.{}: ports not specified, using default 9000-9999",
                name
            ));
        }

        if settings.idle_timeout == 0 {
            result.error(format!("tables.{}: idle_timeout must be positive", name));
        }

        match &settings.ports {
            PortsConfig::Range([lo, hi]) if lo > hi => {
                result.error(format!(
                    "tables.{}: invalid range - start ({}) > end ({})",
                    name, lo, hi
                ));
            }
            PortsConfig::MapE { profile, psid } if *psid > profile.max_psid() => {
                result.error(format!(
                    "tables.{}: psid {} out of range for {} (max {})",
                    name,
                    psid,
                    profile,
                    profile.max_psid()
                ));
            }
            _ => {}
        }

        let ports = settings.ports.port_set();
        if ports.is_empty() {
            result.error(format!("tables.{}: port set is empty", name));
        }
        if ports.as_slice().contains(&0) {
            result.error(format!("tables.{}: port 0 cannot be allocated", name));
        }

        // PortSet::list collapses repeats, so look at what was written
        let mut seen = HashSet::new();
        let configured: &[u16] = match &settings.ports {
            PortsConfig::List(list) => list.as_slice(),
            _ => ports.as_slice(),
        };
        let duplicates: Vec<u16> = configured
            .iter()
            .filter(|port| !seen.insert(**port))
            .copied()
            .collect();
        if !duplicates.is_empty() {
            result.error(format!(
                "tables.{}: duplicate ports {:?}",
                name, duplicates
            ));
        }
    }
}

fn validate_runtime(config: &Config, result: &mut ValidationResult) {
    if config.sweep.interval_secs == 0 {
        result.warn(
            "sweep.interval_secs: periodic sweep disabled, idle sessions are only reclaimed on allocation",
        );
    }

    if config.event_log.path.is_none() {
        result.warn("event_log.path: not specified, session events are not recorded");
    }

    if config.tun.mtu < 576 {
        result.error(format!(
            "tun.mtu: {} is below the IPv4 minimum of 576",
            config.tun.mtu
        ));
    }

    if !matches!(config.log.format.as_str(), "pretty" | "compact" | "json") {
        result.warn(format!(
            "log.format: unknown format '{}', using pretty",
            config.log.format
        ));
    }
}
