use anyhow::Result;
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::Repository;
use crate::package::{Dependency, InstalledPackage, Package, UserRequestPackage};
use crate::site::Environment;

/// How much freedom the resolver gets over already installed packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Installed packages are pinned to their installed version.
    Fast,
    /// Installed packages may change version; the installed one is tried first.
    Slow,
}

/// Repository adapter used for installation planning.
pub struct InstallationRepository<'a> {
    source: &'a dyn Repository,
    request: Arc<UserRequestPackage>,
    preinstalled: &'a BTreeMap<String, Arc<InstalledPackage>>,
    unspecified: &'a HashSet<String>,
    mode: PlanMode,
}

impl<'a> InstallationRepository<'a> {
    /// `preinstalled` and `unspecified` are keyed by normalized package name.
    pub fn new(
        source: &'a dyn Repository,
        request: Arc<UserRequestPackage>,
        preinstalled: &'a BTreeMap<String, Arc<InstalledPackage>>,
        unspecified: &'a HashSet<String>,
        mode: PlanMode,
    ) -> Self {
        Self {
            source,
            request,
            preinstalled,
            unspecified,
            mode,
        }
    }

    pub fn mode(&self) -> PlanMode {
        self.mode
    }

    /// Keep only candidates at or above the newest release's `major.minor`, so a
    /// new request without a version does not settle for an old release.
    fn narrow_to_latest(packages: &mut Vec<Arc<dyn Package>>) {
        let Some(latest) = packages.iter().map(|p| p.descriptor().version.clone()).max() else {
            return;
        };

        match latest.without_patch() {
            Some(floor) => packages.retain(|p| p.descriptor().version >= floor),
            None => packages.retain(|p| p.descriptor().version == latest),
        }
    }
}

impl Repository for InstallationRepository<'_> {
    fn name(&self) -> &str {
        "installation"
    }

    fn match_dependency(
        &self,
        dependency: &Dependency,
        env: &Environment,
    ) -> Result<Vec<Arc<dyn Package>>> {
        let key = dependency.package_name_key();
        if key == self.request.name_key() {
            return Ok(vec![self.request.clone() as Arc<dyn Package>]);
        }

        let installed = self.preinstalled.get(&key);
        if let (Some(installed), PlanMode::Fast) = (installed, self.mode) {
            return Ok(vec![installed.clone() as Arc<dyn Package>]);
        }

        let mut packages = self.source.match_dependency(dependency, env)?;
        match installed {
            Some(installed) => {
                let version = &installed.descriptor().version;
                packages.sort_by_key(|p| p.descriptor().version != *version);
            }
            None if self.mode == PlanMode::Fast && self.unspecified.contains(&key) => {
                Self::narrow_to_latest(&mut packages);
                debug!(
                    "Narrowed unversioned request {} to {} candidate(s)",
                    dependency,
                    packages.len()
                );
            }
            None => {}
        }

        Ok(packages)
    }
}
