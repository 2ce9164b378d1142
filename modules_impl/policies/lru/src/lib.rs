//! # DiME LRU Page Replacement
//!
//! Two-list LRU for the disaggregated memory emulator. Every instance gets
//! a free pool plus an active and an inactive list for each page class
//! (page cache and anonymous). Faults reuse records through a fixed tier
//! chain; a background reclaimer keeps the free pool topped up and ages the
//! active lists into the inactive ones.
//!
//! ## Layout
//!
//! - [`arena`]: stable page records, claimed up to the local budget
//! - [`list`]: lock-per-list FIFO lists threaded through the arena
//! - [`state`]: per-instance lists and counters
//! - [`evict`]: the fault path and its tier chain
//! - [`balance`]: list aging and free pool refill
//! - [`kswapd`]: the background reclaimer loop
//! - [`report`]: the statistics table
//! - [`policy`]: [`LruPolicy`], plugging all of the above into the dispatcher
//!
//! ## Features
//!
//! - `std` (default): thread-backed reclaimer ([`KswapdHandle`]) and the
//!   [`LruModule`] load/unload lifecycle

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod arena;
pub mod balance;
pub mod config;
pub mod evict;
pub mod kswapd;
pub mod list;
pub mod policy;
pub mod report;
pub mod state;
pub mod stats;

pub use arena::{PageArena, PageId, PageRecord};
pub use balance::BalanceStats;
pub use config::ReclaimConfig;
pub use evict::Victim;
#[cfg(feature = "std")]
pub use kswapd::KswapdHandle;
pub use kswapd::{Kswapd, Reclaimer, StopToken};
pub use list::PageList;
#[cfg(feature = "std")]
pub use policy::LruModule;
pub use policy::{LruPolicy, POLICY_NAME};
pub use report::{ReportRow, ReportSession, ReportSource};
pub use state::{ListKind, PrpState};
pub use stats::{Counter, Stats, StatsSnapshot};
