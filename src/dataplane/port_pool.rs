//! Global port sets and the two allocation schemes built on them
//!
//! - [`PortProbe`]: bounded random probing with a caller supplied collision check
//! - [`ExclusivePool`]: FIFO free-list where each port has at most one owner

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Number of random candidates drawn before allocation gives up
pub const MAX_PROBES: usize = 20;

/// MAP-E port-set profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapEProfile {
    /// 15 cycles of 4096 ports, 16 ports per PSID
    V6plus,
    /// 63 cycles of 1024 ports, 16 ports per PSID
    OcnVc,
}

impl MapEProfile {
    /// Largest PSID whose block still fits inside one cycle
    pub fn max_psid(self) -> u16 {
        match self {
            MapEProfile::V6plus => 255,
            MapEProfile::OcnVc => 63,
        }
    }
}

impl fmt::Display for MapEProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapEProfile::V6plus => write!(f, "v6plus"),
            MapEProfile::OcnVc => write!(f, "ocn_vc"),
        }
    }
}

/// Ordered list of ports reserved for translation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSet(Vec<u16>);

impl PortSet {
    /// Inclusive range `lo..=hi`
    pub fn range(lo: u16, hi: u16) -> Self {
        Self((lo..=hi).collect())
    }

    /// Ports in the given order. Repeats after the first occurrence are
    /// dropped so no port can be issued twice.
    pub fn list(ports: impl IntoIterator<Item = u16>) -> Self {
        let mut seen = HashSet::new();
        Self(ports.into_iter().filter(|p| seen.insert(*p)).collect())
    }

    /// Ports assigned to `psid` under a MAP-E profile.
    pub fn map_e(profile: MapEProfile, psid: u16) -> Self {
        let offset = u32::from(psid) << 4;
        match profile {
            MapEProfile::V6plus => Self::cycles(4096, 15, 4096, offset, 16),
            MapEProfile::OcnVc => Self::cycles(1024, 63, 1024, offset, 16),
        }
    }

    /// `cycle_nums` blocks of `block_size` consecutive ports, block `n`
    /// starting at `cycle_start + n * cycle_size + offset`. Ports above
    /// 65535 are dropped.
    pub fn cycles(
        cycle_size: u32,
        cycle_nums: u32,
        cycle_start: u32,
        offset: u32,
        block_size: u32,
    ) -> Self {
        let mut ports = Vec::with_capacity((cycle_nums * block_size) as usize);
        for n in 0..cycle_nums {
            let start = cycle_start + n * cycle_size + offset;
            ports.extend(
                (start..start + block_size)
                    .filter_map(|p| u16::try_from(p).ok()),
            );
        }
        Self(ports)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }
}

/// Random probing over a port set.
#[derive(Debug)]
pub struct PortProbe {
    ports: PortSet,
    rng: StdRng,
}

impl PortProbe {
    pub fn new(ports: PortSet) -> Self {
        Self {
            ports,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic probe sequence, for tests and reproducible runs.
    pub fn with_seed(ports: PortSet, seed: u64) -> Self {
        Self {
            ports,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw up to [`MAX_PROBES`] candidates and return the first one for
    /// which `collides` is false.
    pub fn probe(&mut self, collides: impl Fn(u16) -> bool) -> Option<u16> {
        let ports = self.ports.as_slice();
        if ports.is_empty() {
            return None;
        }
        for _ in 0..MAX_PROBES {
            let candidate = ports[self.rng.random_range(0..ports.len())];
            if !collides(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

/// FIFO of currently unassigned ports.
#[derive(Debug, Clone)]
pub struct ExclusivePool {
    free: VecDeque<u16>,
}

impl ExclusivePool {
    pub fn new(ports: PortSet) -> Self {
        Self {
            free: ports.0.into(),
        }
    }

    /// Oldest free port, or `None` once every port is assigned.
    pub fn take(&mut self) -> Option<u16> {
        self.free.pop_front()
    }

    /// Return a port released by an evicted session.
    pub fn give_back(&mut self, port: u16) {
        debug_assert!(!self.free.contains(&port), "port {port} released twice");
        self.free.push_back(port);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_port_set_range() {
        let set = PortSet::range(9000, 9003);
        assert_eq!(set.as_slice(), &[9000, 9001, 9002, 9003]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_port_set_list_drops_repeats() {
        let set = PortSet::list([9002, 9000, 9002, 9001, 9000]);
        assert_eq!(set.as_slice(), &[9002, 9000, 9001]);
    }

    #[test]
    fn test_exclusive_pool_issues_repeated_port_once() {
        let mut pool = ExclusivePool::new(PortSet::list([9000, 9000]));
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.take(), Some(9000));
        assert_eq!(pool.take(), None);
    }

    #[test]
    fn test_port_set_v6plus() {
        let set = PortSet::map_e(MapEProfile::V6plus, 30);
        assert_eq!(set.len(), 15 * 16);
        // First block: 4096 + (30 << 4)
        assert_eq!(set.as_slice()[0], 4576);
        assert_eq!(set.as_slice()[15], 4591);
        // Second block one cycle later
        assert_eq!(set.as_slice()[16], 4576 + 4096);
        assert_eq!(*set.as_slice().last().unwrap(), 4576 + 14 * 4096 + 15);
    }

    #[test]
    fn test_port_set_ocn_vc() {
        let set = PortSet::map_e(MapEProfile::OcnVc, 0);
        assert_eq!(set.len(), 63 * 16);
        assert_eq!(set.as_slice()[0], 1024);
        assert_eq!(set.as_slice()[16], 2048);
    }

    #[test]
    fn test_port_set_cycles_drop_overflow() {
        let set = PortSet::cycles(1, 1, 65534, 0, 4);
        assert_eq!(set.as_slice(), &[65534, 65535]);
    }

    #[test]
    fn test_probe_returns_non_colliding() {
        let mut probe = PortProbe::with_seed(PortSet::range(9000, 9001), 7);
        for _ in 0..50 {
            assert_eq!(probe.probe(|p| p == 9000), Some(9001));
        }
    }

    #[test]
    fn test_probe_gives_up_after_max_attempts() {
        let mut probe = PortProbe::with_seed(PortSet::range(9000, 9009), 1);
        let attempts = Cell::new(0);

        let result = probe.probe(|_| {
            attempts.set(attempts.get() + 1);
            true
        });

        assert_eq!(result, None);
        assert_eq!(attempts.get(), MAX_PROBES);
    }

    #[test]
    fn test_probe_empty_set() {
        let mut probe = PortProbe::with_seed(PortSet::default(), 1);
        assert_eq!(probe.probe(|_| false), None);
    }

    #[test]
    fn test_exclusive_pool_fifo() {
        let mut pool = ExclusivePool::new(PortSet::range(9000, 9001));

        assert_eq!(pool.take(), Some(9000));
        assert_eq!(pool.take(), Some(9001));
        assert_eq!(pool.take(), None);

        pool.give_back(9001);
        pool.give_back(9000);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.take(), Some(9001));
    }
}
