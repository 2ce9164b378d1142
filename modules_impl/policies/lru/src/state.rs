//! # Per-Instance Replacement State
//!
//! One [`PrpState`] exists per tracked instance: the record arena, the free
//! pool, active and inactive lists for each page class, and the counters.
//! States of different instances share nothing.

use dime_modules::{
    DimeResult, EvictSource, Instance, InstanceId, PageClass, Pid, TeardownReport,
};

use crate::arena::PageArena;
use crate::list::PageList;
use crate::stats::{Counter, Stats};

/// The five lists of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Free pool
    Free,
    /// Active page cache
    ActivePc,
    /// Inactive page cache
    InactivePc,
    /// Active anonymous
    ActiveAn,
    /// Inactive anonymous
    InactiveAn,
}

impl ListKind {
    /// Every list, in report column order
    pub const ALL: [ListKind; 5] = [
        ListKind::Free,
        ListKind::ActivePc,
        ListKind::InactivePc,
        ListKind::ActiveAn,
        ListKind::InactiveAn,
    ];

    /// Active list of a page class
    pub const fn active(class: PageClass) -> Self {
        match class {
            PageClass::FileCache => ListKind::ActivePc,
            PageClass::Anonymous => ListKind::ActiveAn,
        }
    }

    /// Inactive list of a page class
    pub const fn inactive(class: PageClass) -> Self {
        match class {
            PageClass::FileCache => ListKind::InactivePc,
            PageClass::Anonymous => ListKind::InactiveAn,
        }
    }

    /// Counter for records this list sends to the free pool
    pub(crate) const fn to_free_counter(self) -> Option<Counter> {
        match self {
            ListKind::Free => None,
            ListKind::ActivePc => Some(Counter::PcActiveToFree),
            ListKind::InactivePc => Some(Counter::PcInactiveToFree),
            ListKind::ActiveAn => Some(Counter::AnActiveToFree),
            ListKind::InactiveAn => Some(Counter::AnInactiveToFree),
        }
    }
}

impl From<ListKind> for EvictSource {
    fn from(kind: ListKind) -> Self {
        match kind {
            ListKind::Free => EvictSource::Free,
            ListKind::ActivePc => EvictSource::ActivePc,
            ListKind::InactivePc => EvictSource::InactivePc,
            ListKind::ActiveAn => EvictSource::ActiveAn,
            ListKind::InactiveAn => EvictSource::InactiveAn,
        }
    }
}

/// Replacement state of one instance
#[derive(Debug)]
pub struct PrpState {
    instance: InstanceId,
    local_npages: usize,
    arena: PageArena,
    free: PageList,
    active_pc: PageList,
    inactive_pc: PageList,
    active_an: PageList,
    inactive_an: PageList,
    stats: Stats,
}

impl PrpState {
    /// Create an empty state sized for `instance`
    pub fn new(instance: &Instance) -> DimeResult<Self> {
        Ok(Self {
            instance: instance.id(),
            local_npages: instance.local_npages(),
            arena: PageArena::new(instance.local_npages())?,
            free: PageList::new("free"),
            active_pc: PageList::new("apc"),
            inactive_pc: PageList::new("inpc"),
            active_an: PageList::new("aan"),
            inactive_an: PageList::new("inan"),
            stats: Stats::new(),
        })
    }

    /// Owning instance
    #[inline]
    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    /// Local page budget
    #[inline]
    pub fn local_npages(&self) -> usize {
        self.local_npages
    }

    /// Records allocated so far (`lpl_count`)
    #[inline]
    pub fn lpl_count(&self) -> usize {
        self.arena.allocated()
    }

    /// Record arena
    #[inline]
    pub fn arena(&self) -> &PageArena {
        &self.arena
    }

    /// Event counters
    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// One of the five lists
    pub fn list(&self, kind: ListKind) -> &PageList {
        match kind {
            ListKind::Free => &self.free,
            ListKind::ActivePc => &self.active_pc,
            ListKind::InactivePc => &self.inactive_pc,
            ListKind::ActiveAn => &self.active_an,
            ListKind::InactiveAn => &self.inactive_an,
        }
    }

    /// Free pool
    #[inline]
    pub fn free(&self) -> &PageList {
        &self.free
    }

    /// Active list of a page class
    #[inline]
    pub fn active(&self, class: PageClass) -> &PageList {
        self.list(ListKind::active(class))
    }

    /// Inactive list of a page class
    #[inline]
    pub fn inactive(&self, class: PageClass) -> &PageList {
        self.list(ListKind::inactive(class))
    }

    /// Records on all lists, by counted length
    pub fn resident(&self) -> usize {
        ListKind::ALL.iter().map(|k| self.list(*k).len()).sum()
    }

    /// Pages still missing from the free pool for it to reach `required`
    ///
    /// Budget not yet allocated counts as free. Negative when the pool
    /// already exceeds the target.
    pub fn free_deficit(&self, required: usize) -> isize {
        let available = self.free.len() + self.local_npages - self.lpl_count();
        required as isize - available as isize
    }

    /// Send every record owned by an exited process to the free pool
    ///
    /// Returns the number of records released.
    pub fn release_process(&self, pid: Pid) -> usize {
        let mut released = 0;
        for kind in &ListKind::ALL[1..] {
            let list = self.list(*kind);
            let moved = list.scan_and_partition(&self.arena, list.len(), &self.free, |r| {
                r.pid != pid
            });
            if let Some(counter) = kind.to_free_counter() {
                self.stats.add(counter, moved as u64);
            }
            released += moved;
        }

        if released > 0 {
            log::debug!(
                "lru: instance {}: released {} pages of pid {}",
                self.instance,
                released,
                pid
            );
        }
        released
    }

    /// Verify and drain every list
    ///
    /// A list whose counted length disagrees with its linked length is
    /// logged and drained anyway.
    pub fn teardown(&self) -> TeardownReport {
        let mut report = TeardownReport {
            instance: self.instance,
            allocated: self.lpl_count(),
            ..TeardownReport::default()
        };

        for kind in ListKind::ALL {
            let list = self.list(kind);
            let counted = list.len();
            let linked = list.count_linked(&self.arena);
            if counted != linked {
                log::error!(
                    "lru: instance {}: list {} holds {} pages but counts {}",
                    self.instance,
                    list.name(),
                    linked,
                    counted
                );
                report.mismatched_lists += 1;
            }
            report.released += list.clear(&self.arena);
        }

        if report.released != report.allocated {
            log::error!(
                "lru: instance {}: released {} of {} allocated pages",
                self.instance,
                report.released,
                report.allocated
            );
        }
        report
    }
}

static_assertions::assert_impl_all!(PrpState: Send, Sync);
