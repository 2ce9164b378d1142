//! # Page Lists
//!
//! Circular doubly-linked lists of page records threaded through the arena.
//! Records enter at the tail and leave from the head, so every list is FIFO.
//!
//! ## Locking
//!
//! Each list has its own writer lock, taken for every structural change and
//! released as soon as the change is done. When a change involves two lists,
//! the list records leave is locked before the list they enter.

use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{RwLock, RwLockWriteGuard};

use crate::arena::{PageArena, PageId, PageRecord, NIL};

// =============================================================================
// Links
// =============================================================================

/// Lock-protected part of a list
#[derive(Debug)]
struct Links {
    /// First record, or `NIL`
    head: u32,
}

impl Links {
    const fn new() -> Self {
        Self { head: NIL }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.head == NIL
    }

    fn push_back(&mut self, arena: &PageArena, id: u32) {
        if self.head == NIL {
            arena.set_links(id, id, id);
            self.head = id;
            return;
        }

        let head = self.head;
        let tail = arena.prev_of(head);
        arena.set_links(id, tail, head);
        arena.set_next(tail, id);
        arena.set_prev(head, id);
    }

    fn unlink(&mut self, arena: &PageArena, id: u32) {
        let next = arena.next_of(id);
        if next == id {
            self.head = NIL;
        } else {
            let prev = arena.prev_of(id);
            arena.set_next(prev, next);
            arena.set_prev(next, prev);
            if self.head == id {
                self.head = next;
            }
        }
        arena.set_links(id, NIL, NIL);
    }

    fn pop_front(&mut self, arena: &PageArena) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        let id = self.head;
        self.unlink(arena, id);
        Some(id)
    }

    /// Join the ring starting at `other` after our tail
    fn splice_back(&mut self, arena: &PageArena, other: u32) {
        if other == NIL {
            return;
        }
        if self.head == NIL {
            self.head = other;
            return;
        }

        let head = self.head;
        let tail = arena.prev_of(head);
        let other_tail = arena.prev_of(other);
        arena.set_next(tail, other);
        arena.set_prev(other, tail);
        arena.set_next(other_tail, head);
        arena.set_prev(head, other_tail);
    }

    /// Detach the whole ring
    fn take(&mut self) -> u32 {
        core::mem::replace(&mut self.head, NIL)
    }

    /// Walk the ring, giving up after `limit` nodes
    fn walk(&self, arena: &PageArena, limit: usize, mut f: impl FnMut(u32)) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while cursor != NIL && count < limit {
            f(cursor);
            count += 1;
            cursor = arena.next_of(cursor);
            if cursor == self.head {
                break;
            }
        }
        count
    }
}

// =============================================================================
// Page List
// =============================================================================

/// A FIFO list of page records
#[derive(Debug)]
pub struct PageList {
    name: &'static str,
    links: RwLock<Links>,
    size: AtomicUsize,
    /// Writer lock acquisitions
    acquisitions: AtomicUsize,
}

impl PageList {
    /// Create an empty list
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            links: RwLock::new(Links::new()),
            size: AtomicUsize::new(0),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// List name, as used in reports and logs
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of records on the list
    #[inline]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Is the list empty?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the writer lock was taken
    #[inline]
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Relaxed)
    }

    fn lock(&self) -> RwLockWriteGuard<'_, Links> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.links.write()
    }

    /// Add a detached record at the tail
    pub fn push_back(&self, arena: &PageArena, id: PageId) {
        let mut links = self.lock();
        links.push_back(arena, id.raw());
        self.size.fetch_add(1, Ordering::AcqRel);
    }

    /// Detach the record at the head
    pub fn pop_front(&self, arena: &PageArena) -> Option<PageId> {
        let mut links = self.lock();
        let id = links.pop_front(arena)?;
        self.size.fetch_sub(1, Ordering::AcqRel);
        Some(PageId::from_raw(id))
    }

    /// Move every record of `src` to our tail in O(1)
    ///
    /// `src` is left empty. Our lock is not taken when `src` is empty, and
    /// appending a list to itself does nothing.
    pub fn append(&self, src: &PageList, arena: &PageArena) {
        if ptr::eq(self, src) {
            return;
        }

        let mut from = src.lock();
        if from.is_empty() {
            return;
        }

        let mut to = self.lock();
        let moved = src.size.swap(0, Ordering::AcqRel);
        to.splice_back(arena, from.take());
        self.size.fetch_add(moved, Ordering::AcqRel);
    }

    /// Walk up to `budget` records from the head, moving every record for
    /// which `keep` returns false to the tail of `target`
    ///
    /// `keep` runs under this list's lock and must not take list locks of its
    /// own instance. The head is left on the first record not examined, so a
    /// following call resumes where this one stopped. Returns the number of
    /// records moved.
    pub fn scan_and_partition<F>(
        &self,
        arena: &PageArena,
        budget: usize,
        target: &PageList,
        mut keep: F,
    ) -> usize
    where
        F: FnMut(PageRecord) -> bool,
    {
        if ptr::eq(self, target) {
            return 0;
        }

        let mut links = self.lock();
        let mut to: Option<RwLockWriteGuard<'_, Links>> = None;
        let limit = budget.min(self.size.load(Ordering::Acquire));
        let mut cursor = links.head;
        let mut moved = 0;

        for _ in 0..limit {
            if cursor == NIL {
                break;
            }
            let next = arena.next_of(cursor);
            if !keep(arena.record(PageId::from_raw(cursor))) {
                links.unlink(arena, cursor);
                to.get_or_insert_with(|| target.lock())
                    .push_back(arena, cursor);
                self.size.fetch_sub(1, Ordering::AcqRel);
                target.size.fetch_add(1, Ordering::AcqRel);
                moved += 1;
                if links.is_empty() {
                    cursor = NIL;
                    break;
                }
            }
            cursor = next;
        }

        if cursor != NIL {
            links.head = cursor;
        }
        moved
    }

    /// Count linked records by walking the list
    ///
    /// The walk is bounded by the arena's allocation count, so a corrupted
    /// ring cannot loop forever.
    pub fn count_linked(&self, arena: &PageArena) -> usize {
        let links = self.lock();
        links.walk(arena, arena.allocated().saturating_add(1), |_| {})
    }

    /// Records in list order
    pub fn ids(&self, arena: &PageArena) -> Vec<PageId> {
        let links = self.lock();
        let mut ids = Vec::with_capacity(self.len());
        links.walk(arena, arena.allocated(), |id| ids.push(PageId::from_raw(id)));
        ids
    }

    /// Unlink every record and reset the length
    ///
    /// Returns the number of records actually linked.
    pub fn clear(&self, arena: &PageArena) -> usize {
        let mut links = self.lock();
        let mut drained = 0;
        while links.pop_front(arena).is_some() {
            drained += 1;
        }
        self.size.store(0, Ordering::Release);
        drained
    }

    /// Overwrite the counted length without touching the links
    #[cfg(test)]
    pub(crate) fn skew_len(&self, len: usize) {
        self.size.store(len, Ordering::Release);
    }
}

static_assertions::assert_impl_all!(PageList: Send, Sync);

// =============================================================================
// Staging
// =============================================================================

/// Records scanned in a row before staged records are flushed
pub const SCAN_BATCH: usize = 32;

/// Private list collecting records bound for one destination
///
/// Scans detach records one at a time, inspect them with no shared lock
/// held, and stage them here. [`Staging::flush`] then moves the whole batch
/// with a single [`PageList::append`].
#[derive(Debug)]
pub(crate) struct Staging<'a> {
    staged: PageList,
    dest: &'a PageList,
}

impl<'a> Staging<'a> {
    pub(crate) const fn new(dest: &'a PageList) -> Self {
        Self {
            staged: PageList::new("staging"),
            dest,
        }
    }

    #[inline]
    pub(crate) fn push(&self, arena: &PageArena, id: PageId) {
        self.staged.push_back(arena, id);
    }

    #[inline]
    pub(crate) fn flush(&self, arena: &PageArena) {
        self.dest.append(&self.staged, arena);
    }
}
