use anyhow::Result;
use std::sync::Arc;

use super::{Dependency, InstalledPackage, Package, PackageDescriptor, PackageKind, StoreMode};
use crate::error::Error;
use crate::site::{InstallationTarget, SitePackages};

/// An installed package as seen by removal planning.
///
/// Its dependencies are limited to packages that are still installed, so the
/// resolver can only keep or drop packages, never bring in new ones.
#[derive(Debug, Clone)]
pub struct RemovalPackage {
    package: Arc<InstalledPackage>,
    site: Arc<SitePackages>,
}

impl RemovalPackage {
    pub fn new(package: Arc<InstalledPackage>, site: Arc<SitePackages>) -> Self {
        Self { package, site }
    }

    pub fn installed(&self) -> &Arc<InstalledPackage> {
        &self.package
    }
}

impl Package for RemovalPackage {
    fn descriptor(&self) -> &PackageDescriptor {
        self.package.descriptor()
    }

    fn kind(&self) -> PackageKind {
        PackageKind::Removal
    }

    fn dependencies(&self, target: &InstallationTarget, extras: &[String]) -> Result<Vec<Dependency>> {
        Ok(self
            .package
            .dependencies(target, extras)?
            .into_iter()
            .filter(|d| self.site.contains(&d.package_name))
            .collect())
    }

    fn install_to(&self, _: &InstallationTarget, _: Option<&Dependency>, _: StoreMode) -> Result<()> {
        Err(Error::unsupported(self.descriptor(), "install").into())
    }

    fn update_at(
        &self,
        target: &InstallationTarget,
        user_request: Option<&Dependency>,
        store_mode: StoreMode,
    ) -> Result<()> {
        self.package.update_at(target, user_request, store_mode)
    }

    fn uninstall(&self) -> Result<()> {
        self.package.uninstall()
    }

    fn supports_install(&self) -> bool {
        false
    }

    fn as_installed(&self) -> Option<&InstalledPackage> {
        Some(self.package.as_ref())
    }
}
