//! # Page Record Arena
//!
//! Every page record of an instance lives in one slot of the instance's
//! arena and is addressed by a stable [`PageId`]. Slots are handed out in
//! fixed-size chunks the first time the budget grows into them and are then
//! recycled between lists for the lifetime of the instance.
//!
//! The list links of a record live in its slot. They are only written by the
//! holder of the write lock of the list that currently owns the record (or
//! by the sole owner of a detached record), so relaxed atomics suffice.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use dime_modules::{DimeError, DimeResult, Pid, VirtAddr};
use spin::Once;

/// Link value of a slot that is not on any list
pub(crate) const NIL: u32 = u32::MAX;

/// Slots per arena chunk
pub const CHUNK_SLOTS: usize = 256;

/// Stable handle of a page record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PageId(u32);

impl PageId {
    /// Slot index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Snapshot of a page record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRecord {
    /// Record handle
    pub id: PageId,
    /// Owning process
    pub pid: Pid,
    /// Mapped address
    pub addr: VirtAddr,
}

#[derive(Debug)]
struct Slot {
    prev: AtomicU32,
    next: AtomicU32,
    pid: AtomicU32,
    addr: AtomicU64,
}

impl Slot {
    const fn new() -> Self {
        Self {
            prev: AtomicU32::new(NIL),
            next: AtomicU32::new(NIL),
            pid: AtomicU32::new(0),
            addr: AtomicU64::new(0),
        }
    }
}

/// Arena of page records for one instance
#[derive(Debug)]
pub struct PageArena {
    chunks: Box<[Once<Box<[Slot]>>]>,
    /// Records handed out so far (`lpl_count`)
    allocated: AtomicUsize,
    budget: usize,
}

impl PageArena {
    /// Create an arena able to hold `budget` records
    pub fn new(budget: usize) -> DimeResult<Self> {
        if budget >= NIL as usize {
            return Err(DimeError::InvalidConfig("local_npages too large"));
        }

        let nchunks = budget.div_ceil(CHUNK_SLOTS);
        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(nchunks)
            .map_err(|_| DimeError::OutOfMemory)?;
        chunks.extend((0..nchunks).map(|_| Once::new()));

        Ok(Self {
            chunks: chunks.into_boxed_slice(),
            allocated: AtomicUsize::new(0),
            budget,
        })
    }

    /// Maximum number of records
    #[inline]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Records allocated so far
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Claim a fresh record
    ///
    /// Returns `Ok(None)` once the budget is reached. The claim and the
    /// counter update are a single compare-and-swap, so concurrent callers
    /// never overshoot the budget.
    pub fn allocate(&self) -> DimeResult<Option<PageId>> {
        loop {
            let n = self.allocated.load(Ordering::Acquire);
            if n >= self.budget {
                return Ok(None);
            }
            self.ensure_chunk(n / CHUNK_SLOTS)?;
            if self
                .allocated
                .compare_exchange(n, n + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(Some(PageId(n as u32)));
            }
        }
    }

    fn ensure_chunk(&self, chunk: usize) -> DimeResult<()> {
        let cell = &self.chunks[chunk];
        if cell.get().is_some() {
            return Ok(());
        }

        let len = CHUNK_SLOTS.min(self.budget - chunk * CHUNK_SLOTS);
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| DimeError::OutOfMemory)?;
        slots.extend((0..len).map(|_| Slot::new()));

        // A racing allocator may have won; its chunk is kept and ours dropped.
        cell.call_once(|| slots.into_boxed_slice());
        Ok(())
    }

    #[inline]
    fn slot(&self, raw: u32) -> &Slot {
        let idx = raw as usize;
        match self.chunks[idx / CHUNK_SLOTS].get() {
            Some(chunk) => &chunk[idx % CHUNK_SLOTS],
            None => unreachable!("page {} has no backing chunk", idx),
        }
    }

    /// Current owner and address of a record
    pub fn record(&self, id: PageId) -> PageRecord {
        let slot = self.slot(id.raw());
        PageRecord {
            id,
            pid: Pid(slot.pid.load(Ordering::Relaxed)),
            addr: VirtAddr(slot.addr.load(Ordering::Relaxed)),
        }
    }

    /// Point a detached record at a new mapping
    pub fn assign(&self, id: PageId, pid: Pid, addr: VirtAddr) {
        let slot = self.slot(id.raw());
        slot.pid.store(pid.0, Ordering::Relaxed);
        slot.addr.store(addr.0, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn next_of(&self, raw: u32) -> u32 {
        self.slot(raw).next.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn prev_of(&self, raw: u32) -> u32 {
        self.slot(raw).prev.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_next(&self, raw: u32, next: u32) {
        self.slot(raw).next.store(next, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_prev(&self, raw: u32, prev: u32) {
        self.slot(raw).prev.store(prev, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_links(&self, raw: u32, prev: u32, next: u32) {
        let slot = self.slot(raw);
        slot.prev.store(prev, Ordering::Relaxed);
        slot.next.store(next, Ordering::Relaxed);
    }
}

static_assertions::assert_impl_all!(PageArena: Send, Sync);
static_assertions::const_assert!(CHUNK_SLOTS.is_power_of_two());
