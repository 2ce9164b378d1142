//! # Page Table Adapter
//!
//! The emulator never walks hardware page tables itself. Everything it needs
//! from the memory-management layer goes through [`PageTable`].

use bitflags::bitflags;

use crate::{PageClass, Pid, VirtAddr};

bitflags! {
    /// Software view of the PTE bits the policies care about
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        /// Mapping is present (access not revoked)
        const PRESENT   = 1 << 0;
        /// Page was referenced since the bit was last cleared
        const ACCESSED  = 1 << 1;
        /// Page was written since the bit was last cleared
        const DIRTY     = 1 << 2;
        /// Page already sits on a policy list
        const TRACKED   = 1 << 3;
        /// Page is anonymous (not backed by the page cache)
        const ANONYMOUS = 1 << 4;
    }
}

impl PteFlags {
    /// Referenced since last clear?
    #[inline]
    pub fn accessed(self) -> bool {
        self.contains(Self::ACCESSED)
    }

    /// Modified since last clear?
    #[inline]
    pub fn dirty(self) -> bool {
        self.contains(Self::DIRTY)
    }
}

/// Memory-management primitives consumed by page replacement policies
///
/// Every method may be called concurrently from fault handlers and from the
/// background reclaimer. Policies never hold one of their own list locks
/// while calling into the adapter.
pub trait PageTable: Send + Sync {
    /// Resolved handle to a live mapping
    type Mapping: Copy;

    /// Resolve a process and address to a live mapping
    ///
    /// `None` when the process exited or the address is no longer mapped.
    fn resolve(&self, pid: Pid, addr: VirtAddr) -> Option<Self::Mapping>;

    /// Read the accessed and dirty bits
    fn read_bits(&self, mapping: Self::Mapping) -> PteFlags;

    /// Clear the accessed bit
    fn clear_accessed(&self, mapping: Self::Mapping);

    /// Clear the dirty bit
    fn clear_dirty(&self, mapping: Self::Mapping);

    /// Revoke access so that the next touch faults
    fn revoke_access(&self, mapping: Self::Mapping);

    /// Mark the mapping as sitting on a policy list (idempotent)
    fn mark_tracked(&self, mapping: Self::Mapping);

    /// Classify the backing page, `None` if the page is invalid
    fn page_class(&self, mapping: Self::Mapping) -> Option<PageClass>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_helpers() {
        let flags = PteFlags::PRESENT | PteFlags::ACCESSED;
        assert!(flags.accessed());
        assert!(!flags.dirty());
        assert!((flags | PteFlags::DIRTY).dirty());
    }
}
