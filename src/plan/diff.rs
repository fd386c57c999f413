use log::{debug, trace};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::InstallationPlan;
use crate::error::Result;
use crate::package::{Package, PackageKind, PackageOperation, StoreMode};
use crate::site::InstallationTarget;

/// One package and what execution will do with it.
///
/// An `Update` may carry the installed package rather than the resolved
/// candidate: that is a metadata-only update, and such a package does not
/// support `install_to`.
#[derive(Debug, Clone)]
pub struct PlannedOperation {
    pub package: Arc<dyn Package>,
    pub operation: PackageOperation,
}

impl PlannedOperation {
    fn new(package: Arc<dyn Package>, operation: PackageOperation) -> Self {
        Self { package, operation }
    }
}

impl InstallationPlan {
    /// Diff the plan against the packages installed in `target` (the plan's own
    /// target when `None`).
    ///
    /// Every package that is either planned or installed gets exactly one
    /// operation: planned packages come first in plan order, then removals in
    /// name order. The diff only reads the site, so it can be recomputed at any
    /// time, and a site that already matches the plan yields only `Skip`.
    #[tracing::instrument(skip(self, target))]
    pub fn compute_operations_for_target(
        &self,
        target: Option<&InstallationTarget>,
    ) -> Result<Vec<PlannedOperation>> {
        let target = target.unwrap_or(self.target.as_ref());
        let site = target.site_packages()?;
        let mut preinstalled: BTreeMap<_, _> = site
            .iter()
            .map(|(key, package)| (key.clone(), package.clone()))
            .collect();

        let mut operations = Vec::with_capacity(self.packages.len() + preinstalled.len());
        for candidate in &self.packages {
            if candidate.kind() == PackageKind::Request {
                continue;
            }
            let key = candidate.name_key();

            let Some(installed) = preinstalled.remove(&key) else {
                operations.push(PlannedOperation::new(
                    candidate.clone(),
                    PackageOperation::Install,
                ));
                continue;
            };

            if installed.descriptor().version != candidate.descriptor().version {
                operations.push(PlannedOperation::new(
                    candidate.clone(),
                    PackageOperation::Update,
                ));
                continue;
            }

            let requested_mode = self.store_mode(&key);
            let store_mode_matching =
                requested_mode == StoreMode::Auto || requested_mode == installed.store_mode();
            let user_request_matching = self
                .user_requests
                .get(&key)
                .is_none_or(|request| installed.user_request() == Some(request));

            let operation = match (store_mode_matching, user_request_matching) {
                (true, true) => PlannedOperation::new(candidate.clone(), PackageOperation::Skip),
                (true, false) => {
                    trace!("{} only needs its user request rewritten", installed.descriptor());
                    PlannedOperation::new(installed as Arc<dyn Package>, PackageOperation::Update)
                }
                (false, _) => PlannedOperation::new(candidate.clone(), PackageOperation::Update),
            };
            operations.push(operation);
        }

        operations.extend(
            preinstalled
                .into_values()
                .map(|installed| PlannedOperation::new(installed, PackageOperation::Remove)),
        );

        debug!(
            "Computed {} operation(s) for {:?}",
            operations.len(),
            target.site_dir()
        );
        Ok(operations)
    }
}
