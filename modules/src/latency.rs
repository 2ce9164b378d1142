//! # Latency Injection
//!
//! Policies decide *when* remote-memory cost has to be charged (for example
//! when a dirty page is written back); the injector decides *how*.

use crate::{Instance, PageClass};

/// Charges emulated remote-memory latency
pub trait LatencyInjector: Send + Sync {
    /// Stall the caller for one remote page transfer of `instance`
    fn inject_delay(&self, instance: &Instance, class: PageClass);
}

/// Injector that charges nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl LatencyInjector for NoDelay {
    #[inline]
    fn inject_delay(&self, _instance: &Instance, _class: PageClass) {}
}

/// Busy-waiting injector
///
/// Spins for the instance's `latency_ns`, using a calibrated number of
/// spin-loop iterations per microsecond.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    spins_per_us: u64,
}

impl SpinDelay {
    /// Create an injector for the given spin rate
    pub const fn new(spins_per_us: u64) -> Self {
        Self { spins_per_us }
    }

    /// Number of spin iterations charged for `latency_ns`
    #[inline]
    pub fn spins_for(&self, latency_ns: u64) -> u64 {
        latency_ns.saturating_mul(self.spins_per_us) / 1000
    }
}

impl LatencyInjector for SpinDelay {
    fn inject_delay(&self, instance: &Instance, _class: PageClass) {
        for _ in 0..self.spins_for(instance.latency_ns()) {
            core::hint::spin_loop();
        }
    }
}
