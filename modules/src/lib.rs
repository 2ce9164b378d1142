//! # DiME Module Framework
//!
//! The framework side of the disaggregated memory emulator. It knows nothing
//! about how pages are chosen for eviction; it defines the entities and the
//! seams that a page replacement policy plugs into.
//!
//! ## Components
//!
//! - **Instance**: a tracked workload with a local page budget
//! - **Page table adapter**: access/dirty bits, access revocation, page class
//! - **Latency injector**: charges emulated remote-memory cost
//! - **Policy trait**: `place_page` on every fault, `teardown` on unload
//! - **Dispatcher**: owns the instances and the registered policy
//!
//! ## Features
//!
//! - `std`: `std::error::Error` for [`DimeError`]
//! - `sim`: `sim::SimPageTable`, a software page table for tests and demos

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod dispatcher;
pub mod error;
pub mod instance;
pub mod latency;
pub mod page_table;
pub mod policy;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

use core::fmt;

pub use dispatcher::Dime;
pub use error::{DimeError, DimeResult};
pub use instance::{Instance, InstanceConfig, InstanceId};
pub use latency::{LatencyInjector, NoDelay, SpinDelay};
pub use page_table::{PageTable, PteFlags};
pub use policy::{EvictSource, FaultOutcome, PageReplacementPolicy, TeardownReport};

/// Process identifier of a tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User virtual address of a faulting page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl VirtAddr {
    /// Page size used by the emulator (4 KiB)
    pub const PAGE_SIZE: u64 = 4096;

    /// Round down to the containing page
    #[inline]
    pub const fn page_base(self) -> Self {
        Self(self.0 & !(Self::PAGE_SIZE - 1))
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Backing class of a resident page
///
/// File-backed pages and anonymous pages are kept on separate
/// active/inactive list pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageClass {
    /// Page cache (file-backed)
    FileCache,
    /// Anonymous memory
    Anonymous,
}

impl PageClass {
    /// Short tag used in logs and report columns
    pub const fn tag(self) -> &'static str {
        match self {
            PageClass::FileCache => "pc",
            PageClass::Anonymous => "an",
        }
    }
}
