use anyhow::Result;
use std::sync::Arc;

use super::{InstallationTarget, SitePackages};
use crate::package::{InstalledPackage, Package};

/// Sub-directory of a container package holding the container's own site.
pub const CONTAINER_SITE_DIR: &str = "site";

/// Name suffix of container packages that wrap a single application.
const CONTAINERIZED_SUFFIX: &str = "-containerized";

/// An installed package that hosts an application in a private site.
#[derive(Debug)]
pub struct PackageContainer {
    package: Arc<InstalledPackage>,
    target: InstallationTarget,
}

impl PackageContainer {
    fn new(host: &InstallationTarget, package: Arc<InstalledPackage>) -> Self {
        let target = host.nested(package.dir().join(CONTAINER_SITE_DIR));
        Self { package, target }
    }

    pub fn package(&self) -> &Arc<InstalledPackage> {
        &self.package
    }

    /// The container's private installation target.
    pub fn installation_target(&self) -> &InstallationTarget {
        &self.target
    }

    /// The application this container was created for.
    pub fn containerized_package(&self) -> Result<Option<Arc<InstalledPackage>>> {
        let site = self.target.site_packages()?;
        let name = &self.package.descriptor().name;
        let wrapped = self
            .package
            .name_key()
            .strip_suffix(CONTAINERIZED_SUFFIX)
            .and_then(|app| site.get(app).cloned());
        Ok(wrapped.or_else(|| site.get(name).cloned()))
    }

    /// User requested packages in the container other than the application itself.
    pub fn list_installed_plugins(&self) -> Result<Vec<Arc<InstalledPackage>>> {
        let main = self.containerized_package()?.map(|p| p.name_key());
        let own = self.package.name_key();
        Ok(self
            .target
            .site_packages()?
            .packages()
            .filter(|p| p.is_user_requested())
            .filter(|p| Some(p.name_key()) != main && p.name_key() != own)
            .cloned()
            .collect())
    }

    /// Remove the container, and everything inside it, from its host site.
    pub fn uninstall(&self) -> Result<()> {
        self.package.uninstall()
    }
}

/// The containers installed in a site.
#[derive(Debug, Default)]
pub struct PackageContainers {
    containers: Vec<PackageContainer>,
}

impl PackageContainers {
    pub(crate) fn new(host: &InstallationTarget, site: &SitePackages) -> Self {
        let containers = site
            .packages()
            .filter(|p| p.is_containerized())
            .map(|p| PackageContainer::new(host, p.clone()))
            .collect();
        Self { containers }
    }

    pub fn containers(&self) -> &[PackageContainer] {
        &self.containers
    }

    /// The container hosting `package`, looked up under its own name and its
    /// `-containerized` wrapper name.
    pub fn container_of(&self, package: &str) -> Option<&PackageContainer> {
        let direct = crate::package::normalize_name(package);
        let wrapper = format!("{}{}", direct, CONTAINERIZED_SUFFIX);
        self.containers
            .iter()
            .find(|c| c.package.name_key() == direct || c.package.name_key() == wrapper)
    }
}
