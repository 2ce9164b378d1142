//! # Background Reclaimer
//!
//! `kswapd` sleeps for the configured interval, runs one reclaim cycle and
//! repeats until its [`StopToken`] is triggered. The token is checked before
//! the first sleep and after each sleep, never in the middle of a cycle.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

/// Something the reclaimer can drive
pub trait Reclaimer: Send + Sync {
    /// Run one reclaim cycle over every instance
    fn reclaim_cycle(&self);
}

/// Stop request shared with a running reclaimer
#[derive(Debug, Default)]
pub struct StopToken {
    stopped: AtomicBool,
}

impl StopToken {
    /// Fresh, untriggered token
    pub const fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
        }
    }

    /// Ask the reclaimer to stop
    #[inline]
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Has a stop been requested?
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// The background reclaimer
pub struct Kswapd<R: Reclaimer> {
    reclaimer: Arc<R>,
    interval: Duration,
    token: Arc<StopToken>,
}

impl<R: Reclaimer> core::fmt::Debug for Kswapd<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kswapd")
            .field("interval", &self.interval)
            .field("stopped", &self.token.is_stopped())
            .finish()
    }
}

impl<R: Reclaimer> Kswapd<R> {
    /// Reclaimer driving `reclaimer` every `interval`
    pub fn new(reclaimer: Arc<R>, interval: Duration) -> Self {
        Self {
            reclaimer,
            interval,
            token: Arc::new(StopToken::new()),
        }
    }

    /// Token stopping this reclaimer
    pub fn token(&self) -> Arc<StopToken> {
        self.token.clone()
    }

    /// Sleep period
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep with `sleep`, then run a cycle, until stopped
    ///
    /// The stop token is checked after every sleep. Returns the number of
    /// cycles run.
    pub fn run<S>(&self, mut sleep: S) -> u64
    where
        S: FnMut(Duration),
    {
        log::info!("kswapd: started ({:?} interval)", self.interval);
        let mut cycles = 0;
        while !self.token.is_stopped() {
            sleep(self.interval);
            if self.token.is_stopped() {
                break;
            }
            self.reclaimer.reclaim_cycle();
            cycles += 1;
        }
        log::info!("kswapd: stopped after {} cycles", cycles);
        cycles
    }
}

#[cfg(feature = "std")]
mod thread {
    use std::thread::{self, JoinHandle};

    use dime_modules::{DimeError, DimeResult};

    use super::*;

    impl<R: Reclaimer + 'static> Kswapd<R> {
        /// Run on a dedicated thread
        pub fn spawn(self) -> DimeResult<KswapdHandle> {
            let token = self.token();
            let thread = thread::Builder::new()
                .name("dime-kswapd".into())
                .spawn(move || self.run(thread::park_timeout))
                .map_err(|err| {
                    log::error!("kswapd: cannot spawn thread: {}", err);
                    DimeError::ThreadSpawn
                })?;

            Ok(KswapdHandle {
                token,
                thread: Some(thread),
            })
        }
    }

    /// Handle to a reclaimer thread
    ///
    /// Dropping the handle stops the thread.
    #[derive(Debug)]
    pub struct KswapdHandle {
        token: Arc<StopToken>,
        thread: Option<JoinHandle<u64>>,
    }

    impl KswapdHandle {
        /// Stop the thread and wait for it
        ///
        /// Returns the number of cycles it ran.
        pub fn stop(mut self) -> u64 {
            self.shutdown()
        }

        fn shutdown(&mut self) -> u64 {
            self.token.stop();
            let Some(thread) = self.thread.take() else {
                return 0;
            };
            thread.thread().unpark();
            match thread.join() {
                Ok(cycles) => cycles,
                Err(_) => {
                    log::error!("kswapd: thread panicked");
                    0
                },
            }
        }
    }

    impl Drop for KswapdHandle {
        fn drop(&mut self) {
            self.shutdown();
        }
    }
}

#[cfg(feature = "std")]
pub use thread::KswapdHandle;
