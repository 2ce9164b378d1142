//! # Page Replacement Policies
//!
//! A policy receives every fault that needs local residency and answers with
//! the record it reused. The dispatcher does not care how the choice is made.

use core::fmt;

use crate::{DimeResult, Instance, InstanceId, Pid, VirtAddr};

/// Where a reused record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictSource {
    /// Free pool
    Free,
    /// Active page cache list
    ActivePc,
    /// Inactive page cache list
    InactivePc,
    /// Active anonymous list
    ActiveAn,
    /// Inactive anonymous list
    InactiveAn,
}

impl EvictSource {
    /// Short name matching the report columns
    pub const fn name(self) -> &'static str {
        match self {
            EvictSource::Free => "free",
            EvictSource::ActivePc => "apc",
            EvictSource::InactivePc => "inpc",
            EvictSource::ActiveAn => "aan",
            EvictSource::InactiveAn => "inan",
        }
    }
}

impl fmt::Display for EvictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of placing a faulting page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The instance has no local budget; nothing is tracked
    Unbounded,
    /// A fresh record was allocated below the budget
    Allocated,
    /// A resident record was reused
    Reused {
        /// List the record was taken from
        source: EvictSource,
        /// The access bit was ignored to obtain it
        forced: bool,
    },
}

impl FaultOutcome {
    /// Should the caller charge remote-memory latency for this fault?
    ///
    /// Faults that still fit in local memory are served without delay.
    #[inline]
    pub fn needs_delay(&self) -> bool {
        matches!(self, FaultOutcome::Reused { .. })
    }
}

/// Accounting returned when an instance is torn down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Instance that was torn down
    pub instance: InstanceId,
    /// Records ever allocated for the instance
    pub allocated: usize,
    /// Records found on the lists and released
    pub released: usize,
    /// Lists whose counted length disagreed with their linked length
    pub mismatched_lists: u32,
}

impl TeardownReport {
    /// Every record accounted for and every list consistent
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.allocated == self.released && self.mismatched_lists == 0
    }
}

/// A page replacement policy
pub trait PageReplacementPolicy: Send + Sync {
    /// Policy name (registry key)
    fn name(&self) -> &'static str;

    /// Choose a record for a page faulted by `pid` at `addr`
    ///
    /// Called synchronously on the faulting thread.
    fn place_page(&self, instance: &Instance, pid: Pid, addr: VirtAddr) -> DimeResult<FaultOutcome>;

    /// Release every record held for `instance`
    ///
    /// Must not run while the policy may still reclaim for the instance.
    /// Returns [`DimeError::InstanceNotFound`](crate::DimeError) for an
    /// instance the policy never managed.
    fn teardown(&self, instance: &Instance) -> DimeResult<TeardownReport>;
}
