use anyhow::Context;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::{InstallationPlan, InstallationPlanner};
use crate::error::Result;
use crate::package::{Package, UserRequestPackage, normalize_name};
use crate::repository::RemovalRepository;
use crate::resolver::DependencyOverrides;

impl InstallationPlanner {
    /// Remove packages without breaking anything still requested.
    ///
    /// The remaining user requests are re-resolved against installed packages
    /// only. A package named here that is still needed stays installed but is no
    /// longer marked as user requested; anything no longer needed, named or not,
    /// is removed. Returns the names that did not survive.
    #[tracing::instrument(skip(self))]
    pub async fn uninstall(&self, packages: &[String]) -> Result<HashSet<String>> {
        self.target.reload();
        let site = self.target.site_packages()?;

        let to_remove: HashSet<String> = packages.iter().map(|n| normalize_name(n)).collect();
        let requested: BTreeMap<_, _> = site
            .user_requests()
            .into_iter()
            .filter(|(key, _)| !to_remove.contains(key))
            .collect();
        debug!("{} request(s) remain after removal", requested.len());

        let root = Arc::new(UserRequestPackage::new(requested.into_values()));
        let repository = RemovalRepository::new(root.clone(), site.clone());
        let resolved = self.resolver.resolve(
            &root.to_dependency(),
            &self.target,
            &repository,
            &DependencyOverrides::new(),
        )?;

        let plan = InstallationPlan::new(
            self.target.clone(),
            self.executor.clone(),
            resolved,
            BTreeMap::new(),
        );
        plan.execute(None).await?;

        let kept: HashSet<String> = plan.packages().iter().map(|p| p.name_key()).collect();
        let mut removed = HashSet::new();
        for name in packages {
            let key = normalize_name(name);
            if !kept.contains(&key) {
                removed.insert(name.clone());
                continue;
            }
            if let Some(installed) = site.get(&key).filter(|p| p.is_user_requested()) {
                info!("{} is still required, keeping it as a dependency", installed.descriptor());
                installed.unmark_user_requested()?;
            }
        }
        self.target.reload();

        Ok(removed)
    }

    /// Uninstall `name` right away, with no dependency checks. Falls back to the
    /// container wrapping `name` when there is no package by that name.
    ///
    /// Returns whether anything was found to remove.
    #[tracing::instrument(skip(self))]
    pub fn force_remove(&self, name: &str) -> Result<bool> {
        self.target.reload();

        let result = match self.target.site_packages()?.get(name) {
            Some(installed) => installed.uninstall().map(|_| true),
            None => match self.target.package_containers()?.container_of(name) {
                Some(container) => {
                    debug!("Removing container {}", container.package().descriptor());
                    container.uninstall().map(|_| true)
                }
                None => {
                    warn!("{} is not installed", name);
                    Ok(false)
                }
            },
        };
        self.target.reload();

        Ok(result.with_context(|| format!("Failed to force remove {}", name))?)
    }
}
