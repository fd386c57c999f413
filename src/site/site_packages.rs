use anyhow::Result;
use log::warn;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::package::{Dependency, InstalledPackage, Package, RECORD_FILE, normalize_name};
use crate::runtime::Runtime;

/// Immutable snapshot of the packages installed in a site, keyed by name key.
#[derive(Debug, Default)]
pub struct SitePackages {
    packages: BTreeMap<String, Arc<InstalledPackage>>,
}

impl SitePackages {
    /// Scan `site_dir` for installation records.
    ///
    /// Directories without a record (partial installs) and records that fail to
    /// load are skipped.
    #[tracing::instrument(skip(runtime))]
    pub fn load(runtime: Arc<dyn Runtime>, site_dir: &Path) -> Result<Self> {
        let mut packages = Vec::new();

        if !runtime.exists(site_dir) {
            return Ok(Self::default());
        }

        for entry in runtime.read_dir(site_dir)? {
            let hidden = entry
                .file_name()
                .and_then(|n| n.to_str())
                .is_none_or(|n| n.starts_with('.'));
            if hidden || !runtime.is_dir(&entry) {
                continue;
            }
            if !runtime.exists(&entry.join(RECORD_FILE)) {
                continue;
            }

            match InstalledPackage::load(runtime.clone(), &entry) {
                Ok(package) => packages.push(Arc::new(package)),
                Err(e) => warn!("Skipping unreadable package in {:?}: {:#}", entry, e),
            }
        }

        Ok(Self::from_packages(packages))
    }

    pub fn from_packages(packages: impl IntoIterator<Item = Arc<InstalledPackage>>) -> Self {
        let mut map = BTreeMap::new();
        for package in packages {
            let key = package.name_key();
            if let Some(previous) = map.insert(key, package) {
                warn!("Duplicate installation of {} in site", previous.descriptor());
            }
        }
        Self { packages: map }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<InstalledPackage>> {
        self.packages.get(&normalize_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(&normalize_name(name))
    }

    /// Installed packages in name key order.
    pub fn packages(&self) -> impl Iterator<Item = &Arc<InstalledPackage>> {
        self.packages.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<InstalledPackage>)> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// User requests of every explicitly requested package, by name key.
    pub fn user_requests(&self) -> BTreeMap<String, Dependency> {
        self.packages
            .iter()
            .filter_map(|(key, p)| p.user_request().map(|d| (key.clone(), d.clone())))
            .collect()
    }
}
