//! # Software Page Table
//!
//! An in-memory [`PageTable`] used by tests and demos. Each `(pid, address)`
//! pair carries a software PTE; processes "touch" and "write" pages by
//! setting the accessed and dirty bits directly.

use core::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use spin::Mutex;

use crate::{Instance, LatencyInjector, PageClass, PageTable, Pid, PteFlags, VirtAddr};

/// Handle to a software mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimMapping {
    /// Owning process
    pub pid: Pid,
    /// Page address
    pub addr: VirtAddr,
}

#[derive(Debug, Clone, Copy)]
struct SimPte {
    flags: PteFlags,
    /// Backing page is valid (has a mapping classification)
    valid: bool,
}

/// In-memory page table
#[derive(Debug, Default)]
pub struct SimPageTable {
    ptes: Mutex<HashMap<SimMapping, SimPte>>,
    revocations: AtomicUsize,
}

impl SimPageTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a page for `pid`
    pub fn map(&self, pid: Pid, addr: VirtAddr, class: PageClass) {
        let mut flags = PteFlags::PRESENT;
        if class == PageClass::Anonymous {
            flags |= PteFlags::ANONYMOUS;
        }
        self.ptes
            .lock()
            .insert(key(pid, addr), SimPte { flags, valid: true });
    }

    /// Remove one mapping
    pub fn unmap(&self, pid: Pid, addr: VirtAddr) -> bool {
        self.ptes.lock().remove(&key(pid, addr)).is_some()
    }

    /// Remove every mapping of an exited process
    pub fn exit(&self, pid: Pid) -> usize {
        let mut ptes = self.ptes.lock();
        let before = ptes.len();
        ptes.retain(|m, _| m.pid != pid);
        before - ptes.len()
    }

    /// Keep the mapping but drop its page classification
    pub fn invalidate_page(&self, pid: Pid, addr: VirtAddr) {
        if let Some(pte) = self.ptes.lock().get_mut(&key(pid, addr)) {
            pte.valid = false;
        }
    }

    /// Simulate a read access
    pub fn touch(&self, pid: Pid, addr: VirtAddr) {
        self.update(pid, addr, |f| f.insert(PteFlags::ACCESSED));
    }

    /// Simulate a write access
    pub fn write(&self, pid: Pid, addr: VirtAddr) {
        self.update(pid, addr, |f| f.insert(PteFlags::ACCESSED | PteFlags::DIRTY));
    }

    /// Current flags of a mapping
    pub fn flags(&self, pid: Pid, addr: VirtAddr) -> Option<PteFlags> {
        self.ptes.lock().get(&key(pid, addr)).map(|pte| pte.flags)
    }

    /// Number of `revoke_access` calls served
    pub fn revocations(&self) -> usize {
        self.revocations.load(Ordering::Relaxed)
    }

    fn update(&self, pid: Pid, addr: VirtAddr, f: impl FnOnce(&mut PteFlags)) {
        if let Some(pte) = self.ptes.lock().get_mut(&key(pid, addr)) {
            f(&mut pte.flags);
        }
    }

    fn update_mapping(&self, mapping: SimMapping, f: impl FnOnce(&mut PteFlags)) {
        if let Some(pte) = self.ptes.lock().get_mut(&mapping) {
            f(&mut pte.flags);
        }
    }
}

#[inline]
fn key(pid: Pid, addr: VirtAddr) -> SimMapping {
    SimMapping {
        pid,
        addr: addr.page_base(),
    }
}

impl PageTable for SimPageTable {
    type Mapping = SimMapping;

    fn resolve(&self, pid: Pid, addr: VirtAddr) -> Option<SimMapping> {
        let mapping = key(pid, addr);
        self.ptes.lock().contains_key(&mapping).then_some(mapping)
    }

    fn read_bits(&self, mapping: SimMapping) -> PteFlags {
        self.ptes
            .lock()
            .get(&mapping)
            .map(|pte| pte.flags)
            .unwrap_or_else(PteFlags::empty)
    }

    fn clear_accessed(&self, mapping: SimMapping) {
        self.update_mapping(mapping, |f| f.remove(PteFlags::ACCESSED));
    }

    fn clear_dirty(&self, mapping: SimMapping) {
        self.update_mapping(mapping, |f| f.remove(PteFlags::DIRTY));
    }

    fn revoke_access(&self, mapping: SimMapping) {
        self.update_mapping(mapping, |f| f.remove(PteFlags::PRESENT));
        self.revocations.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_tracked(&self, mapping: SimMapping) {
        self.update_mapping(mapping, |f| f.insert(PteFlags::TRACKED));
    }

    fn page_class(&self, mapping: SimMapping) -> Option<PageClass> {
        let ptes = self.ptes.lock();
        let pte = ptes.get(&mapping).filter(|pte| pte.valid)?;
        Some(if pte.flags.contains(PteFlags::ANONYMOUS) {
            PageClass::Anonymous
        } else {
            PageClass::FileCache
        })
    }
}

/// Latency injector that only counts its invocations
#[derive(Debug, Default)]
pub struct RecordingDelay {
    file_cache: AtomicUsize,
    anonymous: AtomicUsize,
}

impl RecordingDelay {
    /// Create a zeroed recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays injected for a page class
    pub fn count(&self, class: PageClass) -> usize {
        match class {
            PageClass::FileCache => self.file_cache.load(Ordering::Relaxed),
            PageClass::Anonymous => self.anonymous.load(Ordering::Relaxed),
        }
    }

    /// Delays injected in total
    pub fn total(&self) -> usize {
        self.count(PageClass::FileCache) + self.count(PageClass::Anonymous)
    }
}

impl LatencyInjector for RecordingDelay {
    fn inject_delay(&self, _instance: &Instance, class: PageClass) {
        let counter = match class {
            PageClass::FileCache => &self.file_cache,
            PageClass::Anonymous => &self.anonymous,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
