//! # Reclaim Statistics
//!
//! Per-instance event counters of the victim selector and the rebalancer.
//! Counters only grow; they are relaxed atomics read as a whole through
//! [`StatsSnapshot`].

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($variant:ident => $column:literal,)+) => {
        /// A reclaim event counter, in report column order
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(usize)]
        pub enum Counter {
            $(
                #[doc = concat!("`", $column, "`")]
                $variant,
            )+
        }

        impl Counter {
            /// Every counter, in report column order
            pub const ALL: &'static [Counter] = &[$(Counter::$variant,)+];

            /// Report column header
            pub const fn column(self) -> &'static str {
                match self {
                    $(Counter::$variant => $column,)+
                }
            }
        }
    };
}

counters! {
    FreeEvict => "free_evict",
    ActivePcEvict => "apc_evict",
    InactivePcEvict => "inpc_evict",
    ActiveAnEvict => "aan_evict",
    InactiveAnEvict => "inan_evict",
    ForceActivePcEvict => "fapc_evict",
    ForceInactivePcEvict => "finpc_evict",
    ForceActiveAnEvict => "faan_evict",
    ForceInactiveAnEvict => "finan_evict",
    PcActiveToFree => "apc->free",
    PcInactiveToFree => "inpc->free",
    AnActiveToFree => "aan->free",
    AnInactiveToFree => "inan->free",
    PcActiveToInactive => "apc->inpc",
    PcInactiveToActive => "inpc->apc",
    AnActiveToInactive => "aan->inan",
    AnInactiveToActive => "inan->aan",
    PcInactiveToActivePf => "inpc->apc_pf",
    AnInactiveToActivePf => "inan->aan_pf",
}

/// Number of counters
pub const COUNTER_COUNT: usize = 19;

static_assertions::const_assert_eq!(Counter::AnInactiveToActivePf as usize + 1, COUNTER_COUNT);

/// Counter table of one instance
#[derive(Debug)]
pub struct Stats {
    counters: [AtomicU64; COUNTER_COUNT],
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    /// Zeroed table
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            counters: [ZERO; COUNTER_COUNT],
        }
    }

    /// Bump a counter by one
    #[inline]
    pub fn inc(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Bump a counter
    #[inline]
    pub fn add(&self, counter: Counter, n: u64) {
        if n != 0 {
            self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Read a counter
    #[inline]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    /// Copy out every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut values = [0; COUNTER_COUNT];
        for (value, counter) in values.iter_mut().zip(self.counters.iter()) {
            *value = counter.load(Ordering::Relaxed);
        }
        StatsSnapshot { values }
    }
}

/// Point-in-time copy of a [`Stats`] table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    values: [u64; COUNTER_COUNT],
}

impl StatsSnapshot {
    /// Value of a counter
    #[inline]
    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter as usize]
    }

    /// Counters with their values, in report column order
    pub fn iter(&self) -> impl Iterator<Item = (Counter, u64)> + '_ {
        Counter::ALL.iter().map(move |c| (*c, self.get(*c)))
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (_, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}
