//! # Victim Selection
//!
//! The fault path. A faulting page gets a fresh record while the instance
//! is below its local budget; after that a resident record is reused,
//! taken from the first tier that yields one:
//!
//! 1. the free pool
//! 2. the inactive page cache list (accessed pages are promoted)
//! 3. the inactive anonymous list (accessed pages are promoted)
//! 4. the active page cache list
//! 5. the active anonymous list
//! 6. the head of any list, ignoring the access bit
//!
//! Page table lookups never happen under a list lock: records are detached
//! first and inspected afterwards.

use dime_modules::{
    DimeError, DimeResult, EvictSource, FaultOutcome, Instance, PageTable, Pid, VirtAddr,
};

use crate::arena::PageId;
use crate::config::ReclaimConfig;
use crate::list::{PageList, Staging, SCAN_BATCH};
use crate::state::{ListKind, PrpState};
use crate::stats::Counter;

/// A record chosen for reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    /// Reused record
    pub id: PageId,
    /// List it was taken from
    pub source: EvictSource,
    /// Taken regardless of its access bit
    pub forced: bool,
}

/// Soft tiers: source list, promotion list, eviction counter, promotion counter
const SOFT_TIERS: [(ListKind, ListKind, Counter, Option<Counter>); 4] = [
    (
        ListKind::InactivePc,
        ListKind::ActivePc,
        Counter::InactivePcEvict,
        Some(Counter::PcInactiveToActivePf),
    ),
    (
        ListKind::InactiveAn,
        ListKind::ActiveAn,
        Counter::InactiveAnEvict,
        Some(Counter::AnInactiveToActivePf),
    ),
    (ListKind::ActivePc, ListKind::ActivePc, Counter::ActivePcEvict, None),
    (ListKind::ActiveAn, ListKind::ActiveAn, Counter::ActiveAnEvict, None),
];

const FORCED_TIERS: [(ListKind, Counter); 4] = [
    (ListKind::InactivePc, Counter::ForceInactivePcEvict),
    (ListKind::InactiveAn, Counter::ForceInactiveAnEvict),
    (ListKind::ActivePc, Counter::ForceActivePcEvict),
    (ListKind::ActiveAn, Counter::ForceActiveAnEvict),
];

/// Detach the head of `list` and revoke its mapping
pub fn evict_head<P: PageTable>(
    state: &PrpState,
    page_table: &P,
    list: &PageList,
) -> Option<PageId> {
    let arena = state.arena();
    let id = list.pop_front(arena)?;
    let record = arena.record(id);
    if let Some(mapping) = page_table.resolve(record.pid, record.addr) {
        page_table.revoke_access(mapping);
    }
    Some(id)
}

/// Find the first unaccessed record of `from`
///
/// Accessed records met on the way are moved to `promote_to` with their
/// access bit untouched. A record whose mapping is gone is taken at once.
/// Each record present on entry is examined at most once. Returns the victim
/// and the number of records moved to `promote_to`.
pub fn evict_single<P: PageTable>(
    state: &PrpState,
    page_table: &P,
    from: &PageList,
    promote_to: &PageList,
) -> (Option<PageId>, usize) {
    let arena = state.arena();
    let promoted = Staging::new(promote_to);
    let mut promotions = 0;
    let mut victim = None;

    for scanned in 1..=from.len() {
        let Some(id) = from.pop_front(arena) else {
            break;
        };
        let record = arena.record(id);
        match page_table.resolve(record.pid, record.addr) {
            None => {
                victim = Some(id);
                break;
            },
            Some(mapping) if page_table.read_bits(mapping).accessed() => {
                promoted.push(arena, id);
                promotions += 1;
            },
            Some(mapping) => {
                page_table.revoke_access(mapping);
                victim = Some(id);
                break;
            },
        }
        if scanned % SCAN_BATCH == 0 {
            promoted.flush(arena);
        }
    }

    promoted.flush(arena);
    (victim, promotions)
}

/// Run the tier chain once
pub fn select_victim<P: PageTable>(state: &PrpState, page_table: &P) -> Option<Victim> {
    let arena = state.arena();
    let stats = state.stats();

    if let Some(id) = state.free().pop_front(arena) {
        stats.inc(Counter::FreeEvict);
        return Some(Victim {
            id,
            source: EvictSource::Free,
            forced: false,
        });
    }

    for (from, to, counter, promotion) in SOFT_TIERS {
        let (victim, promoted) = evict_single(state, page_table, state.list(from), state.list(to));
        if let Some(promotion) = promotion {
            stats.add(promotion, promoted as u64);
        }
        if let Some(id) = victim {
            stats.inc(counter);
            return Some(Victim {
                id,
                source: from.into(),
                forced: false,
            });
        }
    }

    for (from, counter) in FORCED_TIERS {
        if let Some(id) = evict_head(state, page_table, state.list(from)) {
            stats.inc(counter);
            return Some(Victim {
                id,
                source: from.into(),
                forced: true,
            });
        }
    }

    None
}

/// Run the tier chain until it yields, up to the configured pass limit
pub fn reclaim_victim<P: PageTable>(
    state: &PrpState,
    page_table: &P,
    config: &ReclaimConfig,
) -> DimeResult<Victim> {
    for pass in 0..config.max_victim_retries {
        if let Some(victim) = select_victim(state, page_table) {
            return Ok(victim);
        }
        if pass == 0 {
            log::warn!(
                "lru: instance {}: every list is empty, retrying",
                state.instance_id()
            );
        }
        core::hint::spin_loop();
    }

    log::error!(
        "lru: instance {}: no victim after {} passes",
        state.instance_id(),
        config.max_victim_retries
    );
    Err(DimeError::VictimExhausted {
        instance: state.instance_id(),
        attempts: config.max_victim_retries,
    })
}

/// Give the page `pid` faulted at `addr` a record
pub fn place_page<P: PageTable>(
    state: &PrpState,
    page_table: &P,
    config: &ReclaimConfig,
    instance: &Instance,
    pid: Pid,
    addr: VirtAddr,
) -> DimeResult<FaultOutcome> {
    if instance.local_npages() == 0 {
        state.stats().inc(Counter::FreeEvict);
        return Ok(FaultOutcome::Unbounded);
    }

    let (id, outcome) = match state.arena().allocate() {
        Ok(Some(id)) => {
            state.stats().inc(Counter::FreeEvict);
            (id, FaultOutcome::Allocated)
        },
        Ok(None) => {
            let victim = reclaim_victim(state, page_table, config)?;
            let outcome = FaultOutcome::Reused {
                source: victim.source,
                forced: victim.forced,
            };
            (victim.id, outcome)
        },
        Err(err) => {
            log::error!(
                "lru: instance {}: cannot allocate page record: {}",
                state.instance_id(),
                err
            );
            return Err(err);
        },
    };

    install(state, page_table, instance, id, pid, addr);
    Ok(outcome)
}

/// Point a detached record at the faulting page and make it active
fn install<P: PageTable>(
    state: &PrpState,
    page_table: &P,
    instance: &Instance,
    id: PageId,
    pid: Pid,
    addr: VirtAddr,
) {
    let arena = state.arena();
    arena.assign(id, pid, addr);

    let class = page_table.resolve(pid, addr).and_then(|mapping| {
        page_table.mark_tracked(mapping);
        page_table.page_class(mapping)
    });

    match class {
        Some(class) => {
            state.active(class).push_back(arena, id);
            instance.record_class_fault(class);
        },
        None => {
            log::error!(
                "lru: instance {}: no valid page for pid {} at {}",
                state.instance_id(),
                pid,
                addr
            );
            state.list(ListKind::ActivePc).push_back(arena, id);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use dime_modules::sim::SimPageTable;
    use dime_modules::{InstanceConfig, PageClass, PteFlags};

    const P: Pid = Pid(42);

    fn page(i: u64) -> VirtAddr {
        VirtAddr(0x10_0000 + i * 4096)
    }

    struct Fixture {
        pt: SimPageTable,
        instance: Instance,
        state: PrpState,
        config: ReclaimConfig,
    }

    impl Fixture {
        fn new(local: usize) -> Self {
            let instance = Instance::new(InstanceConfig::new(1, local).with_pid(P)).unwrap();
            let state = PrpState::new(&instance).unwrap();
            Self {
                pt: SimPageTable::new(),
                instance,
                state,
                config: ReclaimConfig::default().with_max_victim_retries(3),
            }
        }

        fn fault(&self, i: u64, class: PageClass) -> DimeResult<FaultOutcome> {
            self.pt.map(P, page(i), class);
            place_page(&self.state, &self.pt, &self.config, &self.instance, P, page(i))
        }

        fn pages_on(&self, kind: ListKind) -> Vec<VirtAddr> {
            let arena = self.state.arena();
            self.state
                .list(kind)
                .ids(arena)
                .into_iter()
                .map(|id| arena.record(id).addr)
                .collect()
        }
    }

    #[test]
    fn test_unbounded_instance() {
        let fx = Fixture::new(0);
        for i in 0..5 {
            assert_eq!(fx.fault(i, PageClass::FileCache).unwrap(), FaultOutcome::Unbounded);
        }
        assert_eq!(fx.state.stats().get(Counter::FreeEvict), 5);
        assert_eq!(fx.state.lpl_count(), 0);
        assert_eq!(fx.state.resident(), 0);
        assert_eq!(fx.pt.revocations(), 0);
    }

    #[test]
    fn test_fill_below_budget() {
        let fx = Fixture::new(4);
        for i in 0..4 {
            let class = if i % 2 == 0 {
                PageClass::FileCache
            } else {
                PageClass::Anonymous
            };
            assert_eq!(fx.fault(i, class).unwrap(), FaultOutcome::Allocated);
        }

        assert_eq!(fx.state.lpl_count(), 4);
        assert_eq!(fx.pages_on(ListKind::ActivePc), [page(0), page(2)]);
        assert_eq!(fx.pages_on(ListKind::ActiveAn), [page(1), page(3)]);
        assert_eq!(fx.state.stats().get(Counter::FreeEvict), 4);

        let counters = fx.instance.counters();
        assert_eq!(counters.pc_pagefaults, 2);
        assert_eq!(counters.an_pagefaults, 2);
        assert!(fx.pt.flags(P, page(0)).unwrap().contains(PteFlags::TRACKED));
    }

    #[test]
    fn test_reuse_from_free_pool() {
        let fx = Fixture::new(2);
        fx.fault(0, PageClass::FileCache).unwrap();
        fx.fault(1, PageClass::FileCache).unwrap();

        let id = fx.state.list(ListKind::ActivePc).pop_front(fx.state.arena()).unwrap();
        fx.state.free().push_back(fx.state.arena(), id);

        let outcome = fx.fault(2, PageClass::Anonymous).unwrap();
        assert_eq!(
            outcome,
            FaultOutcome::Reused {
                source: EvictSource::Free,
                forced: false
            }
        );
        assert!(outcome.needs_delay());
        assert_eq!(fx.pages_on(ListKind::ActiveAn), [page(2)]);
        assert_eq!(fx.state.lpl_count(), 2);
    }

    #[test]
    fn test_inactive_scan_promotes_accessed_pages() {
        let fx = Fixture::new(3);
        for i in 0..3 {
            fx.fault(i, PageClass::FileCache).unwrap();
        }
        let arena = fx.state.arena();
        let inactive = fx.state.list(ListKind::InactivePc);
        inactive.append(fx.state.list(ListKind::ActivePc), arena);

        // pages 0 and 1 were touched, page 2 was not
        fx.pt.touch(P, page(0));
        fx.pt.touch(P, page(1));

        let outcome = fx.fault(3, PageClass::FileCache).unwrap();
        assert_eq!(
            outcome,
            FaultOutcome::Reused {
                source: EvictSource::InactivePc,
                forced: false
            }
        );
        assert_eq!(fx.state.stats().get(Counter::InactivePcEvict), 1);
        assert_eq!(fx.state.stats().get(Counter::PcInactiveToActivePf), 2);
        assert!(inactive.is_empty());
        assert_eq!(fx.pages_on(ListKind::ActivePc), [page(0), page(1), page(3)]);
        // promotion leaves the access bit alone
        assert!(fx.pt.flags(P, page(0)).unwrap().accessed());
        // the victim's old mapping lost access
        assert!(!fx.pt.flags(P, page(2)).unwrap().contains(PteFlags::PRESENT));
    }

    #[test]
    fn test_evict_single_promotes_then_evicts() {
        let fx = Fixture::new(2);
        fx.fault(0, PageClass::FileCache).unwrap();
        fx.fault(1, PageClass::FileCache).unwrap();
        let arena = fx.state.arena();
        let active = fx.state.list(ListKind::ActivePc);
        let inactive = fx.state.list(ListKind::InactivePc);
        inactive.append(active, arena);
        fx.pt.touch(P, page(0));

        let (victim, promoted) = evict_single(&fx.state, &fx.pt, inactive, active);
        assert_eq!(promoted, 1);
        assert_eq!(arena.record(victim.unwrap()).addr, page(1));
        assert_eq!(fx.pages_on(ListKind::ActivePc), [page(0)]);
        assert!(inactive.is_empty());
    }

    #[test]
    fn test_gone_mapping_is_taken_first() {
        let fx = Fixture::new(2);
        fx.fault(0, PageClass::Anonymous).unwrap();
        fx.fault(1, PageClass::Anonymous).unwrap();
        let arena = fx.state.arena();
        fx.state
            .list(ListKind::InactiveAn)
            .append(fx.state.list(ListKind::ActiveAn), arena);

        fx.pt.touch(P, page(0));
        fx.pt.touch(P, page(1));
        fx.pt.unmap(P, page(1));

        let outcome = fx.fault(2, PageClass::Anonymous).unwrap();
        assert_eq!(
            outcome,
            FaultOutcome::Reused {
                source: EvictSource::InactiveAn,
                forced: false
            }
        );
        assert_eq!(fx.pages_on(ListKind::ActiveAn), [page(0), page(2)]);
        assert_eq!(fx.state.stats().get(Counter::AnInactiveToActivePf), 1);
    }

    #[test]
    fn test_active_tier_rotates_accessed_pages() {
        let fx = Fixture::new(3);
        for i in 0..3 {
            fx.fault(i, PageClass::FileCache).unwrap();
        }
        fx.pt.touch(P, page(0));

        let outcome = fx.fault(3, PageClass::FileCache).unwrap();
        assert_eq!(
            outcome,
            FaultOutcome::Reused {
                source: EvictSource::ActivePc,
                forced: false
            }
        );
        assert_eq!(fx.state.stats().get(Counter::ActivePcEvict), 1);
        assert_eq!(fx.state.stats().get(Counter::PcInactiveToActivePf), 0);
        assert_eq!(fx.pages_on(ListKind::ActivePc), [page(2), page(0), page(3)]);
    }

    #[test]
    fn test_forced_eviction_when_everything_is_hot() {
        let fx = Fixture::new(4);
        for i in 0..4 {
            fx.fault(i, PageClass::Anonymous).unwrap();
            fx.pt.touch(P, page(i));
        }

        let outcome = fx.fault(4, PageClass::Anonymous).unwrap();
        assert_eq!(
            outcome,
            FaultOutcome::Reused {
                source: EvictSource::ActiveAn,
                forced: true
            }
        );
        assert_eq!(fx.state.stats().get(Counter::ForceActiveAnEvict), 1);
        assert_eq!(fx.state.stats().get(Counter::ActiveAnEvict), 0);
        // the forced victim is the head left after the soft sweep rotated
        assert_eq!(
            fx.pages_on(ListKind::ActiveAn),
            [page(1), page(2), page(3), page(4)]
        );
        assert_eq!(fx.state.lpl_count(), 4);
        assert_eq!(fx.state.resident(), 4);
    }

    #[test]
    fn test_invalid_page_goes_to_active_pc() {
        let fx = Fixture::new(2);
        fx.pt.map(P, page(0), PageClass::Anonymous);
        fx.pt.invalidate_page(P, page(0));

        let outcome =
            place_page(&fx.state, &fx.pt, &fx.config, &fx.instance, P, page(0)).unwrap();
        assert_eq!(outcome, FaultOutcome::Allocated);
        assert_eq!(fx.pages_on(ListKind::ActivePc), [page(0)]);
        let counters = fx.instance.counters();
        assert_eq!(counters.pc_pagefaults + counters.an_pagefaults, 0);

        // never mapped at all
        place_page(&fx.state, &fx.pt, &fx.config, &fx.instance, P, page(9)).unwrap();
        assert_eq!(fx.pages_on(ListKind::ActivePc), [page(0), page(9)]);
    }

    #[test]
    fn test_exhausted_chain_fails() {
        let fx = Fixture::new(1);
        fx.fault(0, PageClass::FileCache).unwrap();
        // hold the only record outside every list
        let id = fx.state.list(ListKind::ActivePc).pop_front(fx.state.arena()).unwrap();

        assert_eq!(
            fx.fault(1, PageClass::FileCache),
            Err(DimeError::VictimExhausted {
                instance: 1,
                attempts: 3
            })
        );
        assert_eq!(fx.state.resident(), 0);
        fx.state.free().push_back(fx.state.arena(), id);
    }

    #[test]
    fn test_evict_head_is_fifo() {
        let fx = Fixture::new(3);
        for i in 0..3 {
            fx.fault(i, PageClass::FileCache).unwrap();
        }
        let list = fx.state.list(ListKind::ActivePc);
        let arena = fx.state.arena();
        for i in 0..3 {
            let id = evict_head(&fx.state, &fx.pt, list).unwrap();
            assert_eq!(arena.record(id).addr, page(i));
            fx.state.free().push_back(arena, id);
        }
        assert!(evict_head(&fx.state, &fx.pt, list).is_none());
        assert_eq!(fx.pt.revocations(), 3);
    }

    #[test]
    fn test_concurrent_faults_respect_budget() {
        extern crate std;
        use std::thread;

        let mut fx = Fixture::new(64);
        // other threads may briefly hold every record detached
        fx.config = fx.config.with_max_victim_retries(u32::MAX);
        let fx = Arc::new(fx);
        for i in 0..2000 {
            fx.pt.map(P, page(i), PageClass::Anonymous);
        }

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let fx = fx.clone();
                thread::spawn(move || {
                    for i in (t * 500)..((t + 1) * 500) {
                        if i % 3 == 0 {
                            fx.pt.touch(P, page(i.saturating_sub(7)));
                        }
                        place_page(&fx.state, &fx.pt, &fx.config, &fx.instance, P, page(i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(fx.state.lpl_count(), 64);
        assert_eq!(fx.state.resident(), 64);
        for kind in ListKind::ALL {
            let list = fx.state.list(kind);
            assert_eq!(list.count_linked(fx.state.arena()), list.len());
        }
        assert_eq!(fx.instance.counters().an_pagefaults, 2000);
    }
}
