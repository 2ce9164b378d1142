//! # List Rebalancing
//!
//! Background aging of the active and inactive lists, and refilling of the
//! free pool. Both run from the reclaimer, never from the fault path.

use dime_modules::{Instance, LatencyInjector, PageClass, PageTable};

use crate::config::ReclaimConfig;
use crate::list::{PageList, Staging, SCAN_BATCH};
use crate::state::{ListKind, PrpState};
use crate::stats::{Counter, Stats};

/// Moves made by one [`balance_lists`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceStats {
    /// Active records whose mapping was gone
    pub active_to_free: usize,
    /// Inactive records whose mapping was gone
    pub inactive_to_free: usize,
    /// Active records demoted
    pub active_to_inactive: usize,
    /// Inactive records promoted
    pub inactive_to_active: usize,
}

impl BalanceStats {
    /// Add these moves to the counters of `class`
    pub fn record(&self, stats: &Stats, class: PageClass) {
        let (to_free, inactive_to_free, demote, promote) = match class {
            PageClass::FileCache => (
                Counter::PcActiveToFree,
                Counter::PcInactiveToFree,
                Counter::PcActiveToInactive,
                Counter::PcInactiveToActive,
            ),
            PageClass::Anonymous => (
                Counter::AnActiveToFree,
                Counter::AnInactiveToFree,
                Counter::AnActiveToInactive,
                Counter::AnInactiveToActive,
            ),
        };
        stats.add(to_free, self.active_to_free as u64);
        stats.add(inactive_to_free, self.inactive_to_free as u64);
        stats.add(demote, self.active_to_inactive as u64);
        stats.add(promote, self.inactive_to_active as u64);
    }
}

/// Age the lists of one page class
///
/// The active sweep stops after `target` records left the active list:
/// unaccessed records are demoted, accessed ones lose their access bit and
/// rotate to the tail. The inactive sweep then looks at every record that
/// was inactive before the call, promoting the accessed ones. Demoted
/// records join the inactive tail after that sweep. Records whose mapping
/// is gone go to the free pool in both sweeps.
pub fn balance_lists<P: PageTable>(
    state: &PrpState,
    page_table: &P,
    class: PageClass,
    target: usize,
) -> BalanceStats {
    let arena = state.arena();
    let active = state.active(class);
    let inactive = state.inactive(class);
    let mut moves = BalanceStats::default();

    // Demotions reach the inactive list only after its sweep
    let to_inactive = Staging::new(inactive);
    let to_free = Staging::new(state.free());

    {
        let kept = Staging::new(active);
        let mut moved = 0;

        for scanned in 1..=active.len() {
            if moved >= target {
                break;
            }
            let Some(id) = active.pop_front(arena) else {
                break;
            };
            let record = arena.record(id);
            match page_table.resolve(record.pid, record.addr) {
                None => {
                    log::trace!("lru: {} at {} is gone", record.pid, record.addr);
                    to_free.push(arena, id);
                    moves.active_to_free += 1;
                    moved += 1;
                },
                Some(mapping) if page_table.read_bits(mapping).accessed() => {
                    page_table.clear_accessed(mapping);
                    kept.push(arena, id);
                },
                Some(_) => {
                    to_inactive.push(arena, id);
                    moves.active_to_inactive += 1;
                    moved += 1;
                },
            }
            if scanned % SCAN_BATCH == 0 {
                kept.flush(arena);
                to_free.flush(arena);
            }
        }

        kept.flush(arena);
        to_free.flush(arena);
    }

    {
        let to_active = Staging::new(active);
        let kept = Staging::new(inactive);

        for scanned in 1..=inactive.len() {
            let Some(id) = inactive.pop_front(arena) else {
                break;
            };
            let record = arena.record(id);
            match page_table.resolve(record.pid, record.addr) {
                None => {
                    log::trace!("lru: {} at {} is gone", record.pid, record.addr);
                    to_free.push(arena, id);
                    moves.inactive_to_free += 1;
                },
                Some(mapping) if page_table.read_bits(mapping).accessed() => {
                    page_table.clear_accessed(mapping);
                    to_active.push(arena, id);
                    moves.inactive_to_active += 1;
                },
                Some(_) => kept.push(arena, id),
            }
            if scanned % SCAN_BATCH == 0 {
                kept.flush(arena);
                to_active.flush(arena);
                to_free.flush(arena);
            }
        }

        kept.flush(arena);
        to_active.flush(arena);
    }

    to_free.flush(arena);
    to_inactive.flush(arena);
    moves
}

/// Move up to `target` unaccessed records of `list` to the free pool
///
/// Dirty records are charged a write-back delay before their access is
/// revoked. Accessed records stay where they are. Returns the number moved.
pub fn try_to_free_pages<P: PageTable, L: LatencyInjector>(
    state: &PrpState,
    page_table: &P,
    delay: &L,
    instance: &Instance,
    list: &PageList,
    class: PageClass,
    target: usize,
) -> usize {
    let arena = state.arena();
    let to_free = Staging::new(state.free());
    let kept = Staging::new(list);
    let mut moved = 0;

    for scanned in 1..=list.len() {
        if moved >= target {
            break;
        }
        let Some(id) = list.pop_front(arena) else {
            break;
        };
        let record = arena.record(id);
        match page_table.resolve(record.pid, record.addr) {
            None => {
                to_free.push(arena, id);
                moved += 1;
            },
            Some(mapping) => {
                let bits = page_table.read_bits(mapping);
                if bits.accessed() {
                    kept.push(arena, id);
                } else {
                    if bits.dirty() {
                        delay.inject_delay(instance, class);
                        page_table.clear_dirty(mapping);
                    }
                    page_table.revoke_access(mapping);
                    to_free.push(arena, id);
                    moved += 1;
                }
            },
        }
        if scanned % SCAN_BATCH == 0 {
            kept.flush(arena);
            to_free.flush(arena);
        }
    }

    kept.flush(arena);
    to_free.flush(arena);
    moved
}

/// Free pool refill order: list, its page class, its counter
const FREE_ORDER: [(ListKind, PageClass, Counter); 4] = [
    (ListKind::InactivePc, PageClass::FileCache, Counter::PcInactiveToFree),
    (ListKind::InactiveAn, PageClass::Anonymous, Counter::AnInactiveToFree),
    (ListKind::ActivePc, PageClass::FileCache, Counter::PcActiveToFree),
    (ListKind::ActiveAn, PageClass::Anonymous, Counter::AnActiveToFree),
];

/// One reclaim cycle for one instance
///
/// Refills the free pool up to its target, then ages both page classes.
/// Returns the number of records moved to the free pool by the refill.
pub fn rebalance<P: PageTable, L: LatencyInjector>(
    state: &PrpState,
    page_table: &P,
    delay: &L,
    instance: &Instance,
    config: &ReclaimConfig,
) -> usize {
    let required = config.required_free(state.local_npages());
    let mut freed = 0;

    for (kind, class, counter) in FREE_ORDER {
        let deficit = state.free_deficit(required);
        if deficit <= 0 {
            break;
        }
        let moved = try_to_free_pages(
            state,
            page_table,
            delay,
            instance,
            state.list(kind),
            class,
            deficit as usize,
        );
        state.stats().add(counter, moved as u64);
        freed += moved;
    }

    for class in [PageClass::FileCache, PageClass::Anonymous] {
        let target = state.active(class).len();
        if target > 0 {
            balance_lists(state, page_table, class, target).record(state.stats(), class);
        }
    }

    if freed > 0 {
        log::debug!(
            "lru: instance {}: freed {} pages (free pool {}/{})",
            state.instance_id(),
            freed,
            state.free().len(),
            required
        );
    }
    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use dime_modules::sim::{RecordingDelay, SimPageTable};
    use dime_modules::{InstanceConfig, Pid, PteFlags, VirtAddr};

    const P: Pid = Pid(5);

    fn page(i: u64) -> VirtAddr {
        VirtAddr(i * 4096)
    }

    struct Fixture {
        pt: SimPageTable,
        delay: RecordingDelay,
        instance: Instance,
        state: PrpState,
    }

    impl Fixture {
        fn new(local: usize) -> Self {
            let instance = Instance::new(InstanceConfig::new(2, local)).unwrap();
            let state = PrpState::new(&instance).unwrap();
            Self {
                pt: SimPageTable::new(),
                delay: RecordingDelay::new(),
                instance,
                state,
            }
        }

        /// Map pages `range` with `class` and put them on `kind`
        fn populate(&self, kind: ListKind, class: PageClass, range: core::ops::Range<u64>) {
            let arena = self.state.arena();
            for i in range {
                self.pt.map(P, page(i), class);
                let id = arena.allocate().unwrap().unwrap();
                arena.assign(id, P, page(i));
                self.state.list(kind).push_back(arena, id);
            }
        }

        fn pages_on(&self, kind: ListKind) -> Vec<u64> {
            let arena = self.state.arena();
            self.state
                .list(kind)
                .ids(arena)
                .into_iter()
                .map(|id| arena.record(id).addr.0 / 4096)
                .collect()
        }
    }

    #[test]
    fn test_balance_demotes_and_promotes() {
        let fx = Fixture::new(8);
        fx.populate(ListKind::ActivePc, PageClass::FileCache, 0..4);
        fx.populate(ListKind::InactivePc, PageClass::FileCache, 4..8);
        fx.pt.touch(P, page(1));
        fx.pt.touch(P, page(5));
        fx.pt.unmap(P, page(6));

        let moves = balance_lists(&fx.state, &fx.pt, PageClass::FileCache, 4);
        assert_eq!(
            moves,
            BalanceStats {
                active_to_free: 0,
                inactive_to_free: 1,
                active_to_inactive: 3,
                inactive_to_active: 1,
            }
        );
        assert_eq!(fx.pages_on(ListKind::ActivePc), [1, 5]);
        assert_eq!(fx.pages_on(ListKind::InactivePc), [4, 7, 0, 2, 3]);
        assert_eq!(fx.pages_on(ListKind::Free), [6]);
        // access bits consumed
        assert!(!fx.pt.flags(P, page(1)).unwrap().accessed());
        assert!(!fx.pt.flags(P, page(5)).unwrap().accessed());

        moves.record(fx.state.stats(), PageClass::FileCache);
        assert_eq!(fx.state.stats().get(Counter::PcActiveToInactive), 3);
        assert_eq!(fx.state.stats().get(Counter::PcInactiveToFree), 1);
        assert_eq!(fx.state.stats().get(Counter::AnActiveToInactive), 0);
    }

    /// Counts bit reads; every read leaves the page accessed again
    struct RetouchingTable {
        inner: SimPageTable,
        reads: core::sync::atomic::AtomicUsize,
    }

    impl PageTable for RetouchingTable {
        type Mapping = dime_modules::sim::SimMapping;

        fn resolve(&self, pid: Pid, addr: VirtAddr) -> Option<Self::Mapping> {
            self.inner.resolve(pid, addr)
        }

        fn read_bits(&self, mapping: Self::Mapping) -> PteFlags {
            self.reads.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
            let bits = self.inner.read_bits(mapping);
            self.inner.touch(mapping.pid, mapping.addr);
            bits
        }

        fn clear_accessed(&self, mapping: Self::Mapping) {
            self.inner.clear_accessed(mapping)
        }

        fn clear_dirty(&self, mapping: Self::Mapping) {
            self.inner.clear_dirty(mapping)
        }

        fn revoke_access(&self, mapping: Self::Mapping) {
            self.inner.revoke_access(mapping)
        }

        fn mark_tracked(&self, mapping: Self::Mapping) {
            self.inner.mark_tracked(mapping)
        }

        fn page_class(&self, mapping: Self::Mapping) -> Option<PageClass> {
            self.inner.page_class(mapping)
        }
    }

    #[test]
    fn test_demoted_pages_skip_inactive_sweep() {
        let fx = Fixture::new(4);
        fx.populate(ListKind::ActivePc, PageClass::FileCache, 0..4);
        let pt = RetouchingTable {
            inner: fx.pt,
            reads: core::sync::atomic::AtomicUsize::new(0),
        };

        let moves = balance_lists(&fx.state, &pt, PageClass::FileCache, 4);
        assert_eq!(moves.active_to_inactive, 4);
        assert_eq!(moves.inactive_to_active, 0);
        assert_eq!(pt.reads.load(core::sync::atomic::Ordering::Relaxed), 4);
        assert!(fx.state.list(ListKind::ActivePc).is_empty());
        assert_eq!(fx.state.list(ListKind::InactivePc).len(), 4);
    }

    #[test]
    fn test_balance_stops_at_target() {
        let fx = Fixture::new(6);
        fx.populate(ListKind::ActiveAn, PageClass::Anonymous, 0..6);
        fx.pt.touch(P, page(0));

        let moves = balance_lists(&fx.state, &fx.pt, PageClass::Anonymous, 2);
        assert_eq!(moves.active_to_inactive, 2);
        // page 0 rotated behind the unexamined pages
        assert_eq!(fx.pages_on(ListKind::ActiveAn), [3, 4, 5, 0]);
        assert_eq!(fx.pages_on(ListKind::InactiveAn), [1, 2]);
    }

    #[test]
    fn test_balance_gone_active_pages() {
        let fx = Fixture::new(3);
        fx.populate(ListKind::ActiveAn, PageClass::Anonymous, 0..3);
        assert_eq!(fx.pt.exit(P), 3);

        let moves = balance_lists(&fx.state, &fx.pt, PageClass::Anonymous, 3);
        assert_eq!(moves.active_to_free, 3);
        assert_eq!(fx.state.free().len(), 3);
        assert!(fx.state.list(ListKind::ActiveAn).is_empty());
    }

    #[test]
    fn test_try_to_free_pages() {
        let fx = Fixture::new(5);
        fx.populate(ListKind::InactiveAn, PageClass::Anonymous, 0..5);
        fx.pt.touch(P, page(0));
        fx.pt.write(P, page(1));
        fx.pt.clear_accessed(fx.pt.resolve(P, page(1)).unwrap());
        fx.pt.unmap(P, page(2));

        let list = fx.state.list(ListKind::InactiveAn);
        let moved = try_to_free_pages(
            &fx.state,
            &fx.pt,
            &fx.delay,
            &fx.instance,
            list,
            PageClass::Anonymous,
            3,
        );
        assert_eq!(moved, 3);
        assert_eq!(fx.pages_on(ListKind::Free), [1, 2, 3]);
        assert_eq!(fx.pages_on(ListKind::InactiveAn), [4, 0]);
        assert_eq!(fx.delay.count(PageClass::Anonymous), 1);

        let flags = fx.pt.flags(P, page(1)).unwrap();
        assert!(!flags.dirty());
        assert!(!flags.contains(PteFlags::PRESENT));
        // accessed page keeps its bit
        assert!(fx.pt.flags(P, page(0)).unwrap().accessed());
    }

    #[test]
    fn test_rebalance_refills_free_pool() {
        let fx = Fixture::new(100);
        let config = ReclaimConfig::default();
        fx.populate(ListKind::InactivePc, PageClass::FileCache, 0..10);
        fx.populate(ListKind::InactiveAn, PageClass::Anonymous, 10..20);
        fx.populate(ListKind::ActivePc, PageClass::FileCache, 20..60);
        fx.populate(ListKind::ActiveAn, PageClass::Anonymous, 60..100);

        let freed = rebalance(&fx.state, &fx.pt, &fx.delay, &fx.instance, &config);
        assert_eq!(freed, 25);
        assert_eq!(fx.state.free().len(), 25);
        assert_eq!(fx.state.free_deficit(25), 0);

        let stats = fx.state.stats();
        assert_eq!(stats.get(Counter::PcInactiveToFree), 10);
        assert_eq!(stats.get(Counter::AnInactiveToFree), 10);
        assert_eq!(stats.get(Counter::PcActiveToFree), 5);
        assert_eq!(stats.get(Counter::AnActiveToFree), 0);
        // aging then demoted every remaining active page
        assert_eq!(stats.get(Counter::PcActiveToInactive), 35);
        assert_eq!(stats.get(Counter::AnActiveToInactive), 40);
        assert_eq!(fx.state.resident(), 100);
    }

    #[test]
    fn test_rebalance_without_deficit_only_ages() {
        let fx = Fixture::new(100);
        let config = ReclaimConfig::default();
        fx.populate(ListKind::ActivePc, PageClass::FileCache, 0..10);

        assert_eq!(rebalance(&fx.state, &fx.pt, &fx.delay, &fx.instance, &config), 0);
        assert!(fx.state.free().is_empty());
        assert_eq!(fx.pages_on(ListKind::InactivePc).len(), 10);
        assert_eq!(fx.pt.revocations(), 0);
    }
}
