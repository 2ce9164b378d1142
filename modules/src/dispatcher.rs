//! # Policy Dispatcher
//!
//! Owns the tracked instances and the registered page replacement policy,
//! and routes every fault to that policy.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use crate::{
    DimeError, DimeResult, FaultOutcome, Instance, InstanceConfig, InstanceId,
    PageReplacementPolicy, Pid, TeardownReport, VirtAddr,
};

/// The dispatcher
pub struct Dime {
    /// Tracked instances, by id
    instances: RwLock<BTreeMap<InstanceId, Arc<Instance>>>,
    /// Registered policy
    policy: RwLock<Option<Arc<dyn PageReplacementPolicy>>>,
}

impl core::fmt::Debug for Dime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dime")
            .field("instances", &self.instances.read().len())
            .field("policy", &self.policy_name())
            .finish()
    }
}

impl Default for Dime {
    fn default() -> Self {
        Self::new()
    }
}

impl Dime {
    /// Create an empty dispatcher
    pub const fn new() -> Self {
        Self {
            instances: RwLock::new(BTreeMap::new()),
            policy: RwLock::new(None),
        }
    }

    /// Create a dispatcher tracking the given instances
    pub fn with_instances<I>(configs: I) -> DimeResult<Self>
    where
        I: IntoIterator<Item = InstanceConfig>,
    {
        let dime = Self::new();
        for config in configs {
            dime.add_instance(config)?;
        }
        Ok(dime)
    }

    /// Start tracking an instance
    pub fn add_instance(&self, config: InstanceConfig) -> DimeResult<Arc<Instance>> {
        let id = config.id;
        let instance = Arc::new(Instance::new(config)?);

        let mut instances = self.instances.write();
        if instances.contains_key(&id) {
            return Err(DimeError::InvalidConfig("duplicate instance id"));
        }
        instances.insert(id, instance.clone());
        drop(instances);

        log::info!(
            "dime: instance {} added ({} local pages)",
            id,
            instance.local_npages()
        );
        Ok(instance)
    }

    /// Look up an instance
    pub fn instance(&self, id: InstanceId) -> Option<Arc<Instance>> {
        self.instances.read().get(&id).cloned()
    }

    /// Instance tracking `pid`, if any
    pub fn instance_of(&self, pid: Pid) -> Option<Arc<Instance>> {
        self.instances
            .read()
            .values()
            .find(|inst| inst.tracks(pid))
            .cloned()
    }

    /// All instances, ordered by id
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.instances.read().values().cloned().collect()
    }

    /// Register the page replacement policy
    pub fn register(&self, policy: Arc<dyn PageReplacementPolicy>) -> DimeResult<()> {
        let mut slot = self.policy.write();
        if let Some(current) = slot.as_ref() {
            log::warn!(
                "dime: cannot register '{}', '{}' is active",
                policy.name(),
                current.name()
            );
            return Err(DimeError::PolicyAlreadyRegistered);
        }
        log::info!("dime: policy '{}' registered", policy.name());
        *slot = Some(policy);
        Ok(())
    }

    /// Deregister the policy and tear down every instance through it
    ///
    /// Instances the policy does not manage are skipped. Teardown continues
    /// past other per-instance failures; the first one is returned after all
    /// instances were visited.
    pub fn deregister(&self, name: &str) -> DimeResult<Vec<TeardownReport>> {
        let policy = {
            let mut slot = self.policy.write();
            match slot.as_ref() {
                Some(current) if current.name() == name => {},
                _ => return Err(DimeError::PolicyNotRegistered),
            }
            slot.take().ok_or(DimeError::PolicyNotRegistered)?
        };

        let mut reports = Vec::new();
        let mut first_err = None;
        for instance in self.instances() {
            match policy.teardown(&instance) {
                Ok(report) => reports.push(report),
                Err(DimeError::InstanceNotFound(id)) => {
                    log::debug!("dime: instance {} not managed by '{}'", id, name);
                },
                Err(err) => {
                    log::error!("dime: teardown of instance {} failed: {}", instance.id(), err);
                    first_err.get_or_insert(err);
                },
            }
        }

        log::info!("dime: policy '{}' deregistered", name);
        match first_err {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }

    /// Name of the registered policy
    pub fn policy_name(&self) -> Option<&'static str> {
        self.policy.read().as_ref().map(|p| p.name())
    }

    /// Route a fault to the registered policy
    pub fn handle_fault(
        &self,
        instance_id: InstanceId,
        pid: Pid,
        addr: VirtAddr,
    ) -> DimeResult<FaultOutcome> {
        let instance = self
            .instance(instance_id)
            .ok_or(DimeError::InstanceNotFound(instance_id))?;
        let policy = self.policy.read().clone().ok_or(DimeError::NoPolicy)?;

        instance.record_fault();
        policy.place_page(&instance, pid, addr.page_base())
    }
}

static_assertions::assert_impl_all!(Dime: Send, Sync);
