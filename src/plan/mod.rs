//! Installation plans: resolving what should be installed, diffing it against
//! a site, and executing the difference.

mod diff;
mod planner;
mod removal;

use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::Result;
use crate::executor::{ExecutionReport, Executor, OperationTask};
use crate::package::{Dependency, Package, PackageKind, PackageOperation, StoreMode, normalize_name};
use crate::site::InstallationTarget;

pub use diff::PlannedOperation;
pub use planner::{FastPathOutcome, InstallationPlanner, PlanOptions, PlanningState};

/// A resolved set of packages for a target, ready to be executed.
pub struct InstallationPlan {
    target: Arc<InstallationTarget>,
    executor: Arc<Executor>,
    packages: Vec<Arc<dyn Package>>,
    user_requests: BTreeMap<String, Dependency>,
    store_modes: Option<HashMap<String, StoreMode>>,
}

impl InstallationPlan {
    /// `user_requests` is keyed by normalized package name. The synthetic request
    /// package is dropped from `packages`.
    pub fn new(
        target: Arc<InstallationTarget>,
        executor: Arc<Executor>,
        packages: Vec<Arc<dyn Package>>,
        user_requests: BTreeMap<String, Dependency>,
    ) -> Self {
        let packages = packages
            .into_iter()
            .filter(|p| p.kind() != PackageKind::Request)
            .collect();
        Self {
            target,
            executor,
            packages,
            user_requests,
            store_modes: None,
        }
    }

    pub fn target(&self) -> &Arc<InstallationTarget> {
        &self.target
    }

    pub fn packages(&self) -> &[Arc<dyn Package>] {
        &self.packages
    }

    pub fn user_requests(&self) -> &BTreeMap<String, Dependency> {
        &self.user_requests
    }

    /// Request store modes per package name. Only allowed before execution.
    pub fn set_store_modes(&mut self, store_modes: HashMap<String, StoreMode>) {
        self.store_modes = Some(
            store_modes
                .into_iter()
                .map(|(name, mode)| (normalize_name(&name), mode))
                .collect(),
        );
    }

    /// The requested store mode for a name key; `Auto` when none was requested.
    pub fn store_mode(&self, name_key: &str) -> StoreMode {
        self.store_modes
            .as_ref()
            .and_then(|modes| modes.get(name_key).copied())
            .unwrap_or_default()
    }

    /// The package selected for `name`, if the plan has one.
    pub fn selected_package(&self, name: &str) -> Option<&Arc<dyn Package>> {
        let key = normalize_name(name);
        self.packages.iter().find(|p| p.name_key() == key)
    }

    /// Diff the plan against `target` (the plan's own target by default), run
    /// every non-skip operation, and reload the target's site view afterwards.
    ///
    /// Reloading happens whether execution succeeded or not, so a failed run can
    /// be retried by executing again.
    pub async fn execute(&self, target: Option<&Arc<InstallationTarget>>) -> Result<ExecutionReport> {
        let target = target.unwrap_or(&self.target).clone();
        let tasks: Vec<OperationTask> = self
            .compute_operations_for_target(Some(target.as_ref()))?
            .into_iter()
            .filter(|op| op.operation != PackageOperation::Skip)
            .map(|op| {
                let key = op.package.name_key();
                OperationTask::new(
                    op.package,
                    op.operation,
                    self.store_mode(&key),
                    self.user_requests.get(&key).cloned(),
                )
            })
            .collect();
        debug!("Executing {} operation(s) on {:?}", tasks.len(), target.site_dir());

        let result = self.executor.execute(target.clone(), tasks).await;
        target.reload();
        result
    }
}

impl std::fmt::Debug for InstallationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationPlan")
            .field("target", &self.target)
            .field("packages", &self.packages)
            .field("user_requests", &self.user_requests)
            .field("store_modes", &self.store_modes)
            .finish()
    }
}
