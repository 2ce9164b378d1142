//! # Instances
//!
//! An instance is a tracked workload: a set of processes sharing one local
//! memory budget and one emulated remote link.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use crate::{DimeError, DimeResult, PageClass, Pid};

/// Instance identifier
pub type InstanceId = u32;

/// Maximum number of processes tracked by a single instance
pub const MAX_TRACKED_PIDS: usize = 1000;

/// Static description of an instance
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    /// Instance id
    pub id: InstanceId,
    /// Local page budget (0 = unbounded, nothing is ever evicted)
    pub local_npages: usize,
    /// Emulated remote access latency
    pub latency_ns: u64,
    /// Emulated remote link bandwidth
    pub bandwidth_bps: u64,
    /// Initially tracked processes
    pub pids: Vec<Pid>,
}

impl InstanceConfig {
    /// Instance with a local page budget and no link parameters
    pub fn new(id: InstanceId, local_npages: usize) -> Self {
        Self {
            id,
            local_npages,
            ..Self::default()
        }
    }

    /// Set the emulated latency
    pub fn with_latency_ns(mut self, latency_ns: u64) -> Self {
        self.latency_ns = latency_ns;
        self
    }

    /// Set the emulated bandwidth
    pub fn with_bandwidth_bps(mut self, bandwidth_bps: u64) -> Self {
        self.bandwidth_bps = bandwidth_bps;
        self
    }

    /// Track a process from the start
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pids.push(pid);
        self
    }
}

/// Fault counters of an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceCounters {
    /// Faults routed to the policy
    pub page_faults: u64,
    /// Faults installed as page cache pages
    pub pc_pagefaults: u64,
    /// Faults installed as anonymous pages
    pub an_pagefaults: u64,
}

/// A tracked workload
#[derive(Debug)]
pub struct Instance {
    id: InstanceId,
    local_npages: usize,
    latency_ns: u64,
    bandwidth_bps: u64,
    pids: RwLock<Vec<Pid>>,
    page_fault_count: AtomicU64,
    pc_pagefaults: AtomicU64,
    an_pagefaults: AtomicU64,
}

impl Instance {
    /// Create an instance from its description
    pub fn new(config: InstanceConfig) -> DimeResult<Self> {
        if config.pids.len() > MAX_TRACKED_PIDS {
            return Err(DimeError::InvalidConfig("too many tracked pids"));
        }
        Ok(Self {
            id: config.id,
            local_npages: config.local_npages,
            latency_ns: config.latency_ns,
            bandwidth_bps: config.bandwidth_bps,
            pids: RwLock::new(config.pids),
            page_fault_count: AtomicU64::new(0),
            pc_pagefaults: AtomicU64::new(0),
            an_pagefaults: AtomicU64::new(0),
        })
    }

    /// Instance id
    #[inline]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Local page budget
    #[inline]
    pub fn local_npages(&self) -> usize {
        self.local_npages
    }

    /// Emulated remote latency
    #[inline]
    pub fn latency_ns(&self) -> u64 {
        self.latency_ns
    }

    /// Emulated remote bandwidth
    #[inline]
    pub fn bandwidth_bps(&self) -> u64 {
        self.bandwidth_bps
    }

    /// Is this process tracked by the instance?
    pub fn tracks(&self, pid: Pid) -> bool {
        self.pids.read().contains(&pid)
    }

    /// Start tracking a process
    pub fn track(&self, pid: Pid) -> DimeResult<()> {
        let mut pids = self.pids.write();
        if pids.contains(&pid) {
            return Ok(());
        }
        if pids.len() >= MAX_TRACKED_PIDS {
            return Err(DimeError::InvalidConfig("too many tracked pids"));
        }
        pids.push(pid);
        Ok(())
    }

    /// Stop tracking a process
    pub fn untrack(&self, pid: Pid) -> bool {
        let mut pids = self.pids.write();
        match pids.iter().position(|p| *p == pid) {
            Some(pos) => {
                pids.swap_remove(pos);
                true
            },
            None => false,
        }
    }

    /// Tracked processes
    pub fn pids(&self) -> Vec<Pid> {
        self.pids.read().clone()
    }

    /// Count a fault routed to the policy
    #[inline]
    pub fn record_fault(&self) {
        self.page_fault_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a fault installed with the given page class
    #[inline]
    pub fn record_class_fault(&self, class: PageClass) {
        let counter = match class {
            PageClass::FileCache => &self.pc_pagefaults,
            PageClass::Anonymous => &self.an_pagefaults,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current fault counters
    pub fn counters(&self) -> InstanceCounters {
        InstanceCounters {
            page_faults: self.page_fault_count.load(Ordering::Relaxed),
            pc_pagefaults: self.pc_pagefaults.load(Ordering::Relaxed),
            an_pagefaults: self.an_pagefaults.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_untrack() {
        let inst = Instance::new(InstanceConfig::new(1, 16).with_pid(Pid(10))).unwrap();
        assert!(inst.tracks(Pid(10)));
        assert!(!inst.tracks(Pid(11)));

        inst.track(Pid(11)).unwrap();
        inst.track(Pid(11)).unwrap();
        assert_eq!(inst.pids().len(), 2);

        assert!(inst.untrack(Pid(10)));
        assert!(!inst.untrack(Pid(10)));
        assert_eq!(inst.pids(), alloc::vec![Pid(11)]);
    }

    #[test]
    fn test_pid_table_limit() {
        let inst = Instance::new(InstanceConfig::new(0, 0)).unwrap();
        for pid in 0..MAX_TRACKED_PIDS as u32 {
            inst.track(Pid(pid)).unwrap();
        }
        assert_eq!(
            inst.track(Pid(u32::MAX)),
            Err(DimeError::InvalidConfig("too many tracked pids"))
        );
    }

    #[test]
    fn test_counters() {
        let inst = Instance::new(InstanceConfig::new(2, 4).with_latency_ns(500)).unwrap();
        inst.record_fault();
        inst.record_fault();
        inst.record_class_fault(PageClass::Anonymous);
        inst.record_class_fault(PageClass::FileCache);
        inst.record_class_fault(PageClass::FileCache);

        let c = inst.counters();
        assert_eq!(c.page_faults, 2);
        assert_eq!(c.pc_pagefaults, 2);
        assert_eq!(c.an_pagefaults, 1);
        assert_eq!(inst.latency_ns(), 500);
    }
}
