//! # LRU Policy
//!
//! [`LruPolicy`] owns the replacement state of every attached instance and
//! plugs into the dispatcher as a [`PageReplacementPolicy`]. With the `std`
//! feature, [`LruModule`] bundles the policy with its reclaimer thread.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use dime_modules::{
    DimeError, DimeResult, FaultOutcome, Instance, InstanceId, LatencyInjector,
    PageReplacementPolicy, PageTable, Pid, TeardownReport, VirtAddr,
};
use spin::RwLock;

use crate::balance;
use crate::config::ReclaimConfig;
use crate::evict;
use crate::kswapd::Reclaimer;
use crate::report::{self, ReportRow, ReportSource};
use crate::state::PrpState;

/// Registry name of the policy
pub const POLICY_NAME: &str = "lru";

#[derive(Debug, Clone)]
struct Attached {
    instance: Arc<Instance>,
    state: Arc<PrpState>,
}

/// Two-list LRU page replacement
pub struct LruPolicy<P: PageTable, L: LatencyInjector> {
    page_table: Arc<P>,
    delay: Arc<L>,
    config: ReclaimConfig,
    states: RwLock<BTreeMap<InstanceId, Attached>>,
}

impl<P: PageTable, L: LatencyInjector> core::fmt::Debug for LruPolicy<P, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LruPolicy")
            .field("config", &self.config)
            .field("instances", &self.states.read().len())
            .finish()
    }
}

impl<P: PageTable, L: LatencyInjector> LruPolicy<P, L> {
    /// Create a policy with no instances attached
    pub fn new(page_table: Arc<P>, delay: Arc<L>, config: ReclaimConfig) -> DimeResult<Self> {
        config.validate()?;
        Ok(Self {
            page_table,
            delay,
            config,
            states: RwLock::new(BTreeMap::new()),
        })
    }

    /// Configuration
    #[inline]
    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    /// Page table adapter
    #[inline]
    pub fn page_table(&self) -> &Arc<P> {
        &self.page_table
    }

    /// Start managing `instance`
    ///
    /// Attaching an instance twice returns its existing state.
    pub fn attach(&self, instance: Arc<Instance>) -> DimeResult<Arc<PrpState>> {
        let id = instance.id();
        if let Some(attached) = self.states.read().get(&id) {
            return Ok(attached.state.clone());
        }

        let state = Arc::new(PrpState::new(&instance)?);
        let mut states = self.states.write();
        let attached = states.entry(id).or_insert_with(|| Attached {
            instance: instance.clone(),
            state,
        });
        log::info!(
            "lru: instance {} attached ({} local pages, free target {})",
            id,
            instance.local_npages(),
            self.config.required_free(instance.local_npages())
        );
        Ok(attached.state.clone())
    }

    /// State of an attached instance
    pub fn state(&self, id: InstanceId) -> Option<Arc<PrpState>> {
        self.states.read().get(&id).map(|a| a.state.clone())
    }

    /// Attached instance ids
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.states.read().keys().copied().collect()
    }

    fn attached(&self) -> Vec<Attached> {
        self.states.read().values().cloned().collect()
    }

    /// Free every record `pid` holds in instance `id`
    pub fn release_process(&self, id: InstanceId, pid: Pid) -> DimeResult<usize> {
        let state = self.state(id).ok_or(DimeError::InstanceNotFound(id))?;
        Ok(state.release_process(pid))
    }

    /// One reclaim cycle for instance `id`
    pub fn rebalance(&self, id: InstanceId) -> DimeResult<usize> {
        let attached = self
            .states
            .read()
            .get(&id)
            .cloned()
            .ok_or(DimeError::InstanceNotFound(id))?;
        Ok(self.rebalance_one(&attached))
    }

    /// One reclaim cycle for every attached instance
    pub fn rebalance_all(&self) -> usize {
        self.attached().iter().map(|a| self.rebalance_one(a)).sum()
    }

    fn rebalance_one(&self, attached: &Attached) -> usize {
        balance::rebalance(
            &attached.state,
            self.page_table.as_ref(),
            self.delay.as_ref(),
            &attached.instance,
            &self.config,
        )
    }

    /// Report rows of every attached instance, ordered by id
    pub fn report_rows(&self) -> Vec<ReportRow> {
        self.attached()
            .iter()
            .map(|a| ReportRow::capture(&a.state, &self.config))
            .collect()
    }

    /// Full text report
    pub fn report(&self) -> String {
        report::render(self.report_rows())
    }
}

impl<P: PageTable, L: LatencyInjector> PageReplacementPolicy for LruPolicy<P, L> {
    fn name(&self) -> &'static str {
        POLICY_NAME
    }

    fn place_page(
        &self,
        instance: &Instance,
        pid: Pid,
        addr: VirtAddr,
    ) -> DimeResult<FaultOutcome> {
        let state = self
            .state(instance.id())
            .ok_or(DimeError::InstanceNotFound(instance.id()))?;
        evict::place_page(
            &state,
            self.page_table.as_ref(),
            &self.config,
            instance,
            pid,
            addr,
        )
    }

    fn teardown(&self, instance: &Instance) -> DimeResult<TeardownReport> {
        let attached = self
            .states
            .write()
            .remove(&instance.id())
            .ok_or(DimeError::InstanceNotFound(instance.id()))?;

        let report = attached.state.teardown();
        log::info!(
            "lru: instance {} torn down ({} of {} pages released)",
            report.instance,
            report.released,
            report.allocated
        );
        Ok(report)
    }
}

impl<P: PageTable, L: LatencyInjector> Reclaimer for LruPolicy<P, L> {
    fn reclaim_cycle(&self) {
        self.rebalance_all();
    }
}

impl<P: PageTable, L: LatencyInjector> ReportSource for LruPolicy<P, L> {
    fn render_report(&self) -> String {
        self.report()
    }
}

#[cfg(feature = "std")]
mod module {
    use dime_modules::Dime;

    use super::*;
    use crate::kswapd::{Kswapd, KswapdHandle};

    /// A loaded LRU policy: registered with the dispatcher, reclaimer running
    pub struct LruModule<P: PageTable + 'static, L: LatencyInjector + 'static> {
        dime: Arc<Dime>,
        policy: Arc<LruPolicy<P, L>>,
        kswapd: Option<KswapdHandle>,
    }

    impl<P, L> core::fmt::Debug for LruModule<P, L>
    where
        P: PageTable + 'static,
        L: LatencyInjector + 'static,
    {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("LruModule")
                .field("policy", &self.policy)
                .field("kswapd", &self.kswapd.is_some())
                .finish()
        }
    }

    impl<P: PageTable + 'static, L: LatencyInjector + 'static> LruModule<P, L> {
        /// Attach every instance of `dime`, register the policy and start
        /// the reclaimer
        pub fn load(
            dime: Arc<Dime>,
            page_table: Arc<P>,
            delay: Arc<L>,
            config: ReclaimConfig,
        ) -> DimeResult<Self> {
            let policy = Arc::new(LruPolicy::new(page_table, delay, config)?);
            for instance in dime.instances() {
                policy.attach(instance)?;
            }
            dime.register(policy.clone())?;

            let kswapd = match Kswapd::new(policy.clone(), config.kswapd_interval()).spawn() {
                Ok(handle) => handle,
                Err(err) => {
                    // Leave the dispatcher as we found it.
                    let _ = dime.deregister(POLICY_NAME);
                    return Err(err);
                },
            };

            log::info!(
                "lru: module loaded ({} instances)",
                policy.instance_ids().len()
            );
            Ok(Self {
                dime,
                policy,
                kswapd: Some(kswapd),
            })
        }

        /// The running policy
        pub fn policy(&self) -> &Arc<LruPolicy<P, L>> {
            &self.policy
        }

        /// Stop the reclaimer, deregister the policy and tear down every
        /// instance
        pub fn unload(mut self) -> DimeResult<Vec<TeardownReport>> {
            if let Some(kswapd) = self.kswapd.take() {
                kswapd.stop();
            }
            let reports = self.dime.deregister(POLICY_NAME)?;
            log::info!("lru: module unloaded");
            Ok(reports)
        }
    }
}

#[cfg(feature = "std")]
pub use module::LruModule;
