//! Installation targets and their live package inventory.
//!
//! Site layout:
//!
//! ```text
//! <site>/
//!   <name_key>/record.json      installation record
//!   <name_key>/...              installed files (or symlinks in link mode)
//!   .store/<name_key>-<version>/ link-mode file store
//! ```

mod containers;
mod site_packages;

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::package::normalize_name;
use crate::runtime::Runtime;
use crate::version::Version;

pub use containers::{CONTAINER_SITE_DIR, PackageContainer, PackageContainers};
pub use site_packages::SitePackages;

/// Directory under the site root holding link-mode file stores.
pub const STORE_DIR: &str = ".store";

/// `<site_dir>/.store/<name_key>-<version>`.
pub fn store_path(site_dir: &Path, name: &str, version: &Version) -> PathBuf {
    site_dir
        .join(STORE_DIR)
        .join(format!("{}-{}", normalize_name(name), version))
}

/// The platform packages are installed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    pub platform: String,
    pub arch: String,
}

impl Environment {
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// `platform-arch`, e.g. `linux-x86_64`.
    pub fn platform_tag(&self) -> String {
        format!("{}-{}", self.platform, self.arch)
    }
}

/// An installation destination with a cached view of what is installed in it.
///
/// Views are immutable snapshots handed out as `Arc`s; [`reload`](Self::reload)
/// drops them so the next read rescans the site.
pub struct InstallationTarget {
    runtime: Arc<dyn Runtime>,
    site_dir: PathBuf,
    env: Environment,
    site_packages: RwLock<Option<Arc<SitePackages>>>,
    package_containers: RwLock<Option<Arc<PackageContainers>>>,
}

impl InstallationTarget {
    pub fn new(runtime: Arc<dyn Runtime>, site_dir: impl Into<PathBuf>) -> Self {
        Self::with_environment(runtime, site_dir, Environment::current())
    }

    pub fn with_environment(
        runtime: Arc<dyn Runtime>,
        site_dir: impl Into<PathBuf>,
        env: Environment,
    ) -> Self {
        Self {
            runtime,
            site_dir: site_dir.into(),
            env,
            site_packages: RwLock::new(None),
            package_containers: RwLock::new(None),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn site_dir(&self) -> &Path {
        &self.site_dir
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Directory a package with this name is installed into.
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.site_dir.join(normalize_name(name))
    }

    /// Link-mode file store of one package version.
    pub fn store_dir(&self, name: &str, version: &Version) -> PathBuf {
        store_path(&self.site_dir, name, version)
    }

    /// Snapshot of installed packages, scanning the site on first access.
    pub fn site_packages(&self) -> Result<Arc<SitePackages>> {
        if let Some(cached) = self
            .site_packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(cached.clone());
        }

        let loaded = Arc::new(SitePackages::load(self.runtime.clone(), &self.site_dir)?);
        let mut slot = self
            .site_packages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(slot.get_or_insert(loaded).clone())
    }

    /// Package containers hosted in this site.
    pub fn package_containers(&self) -> Result<Arc<PackageContainers>> {
        if let Some(cached) = self
            .package_containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(cached.clone());
        }

        let site = self.site_packages()?;
        let containers = Arc::new(PackageContainers::new(self, &site));
        let mut slot = self
            .package_containers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(slot.get_or_insert(containers).clone())
    }

    /// Drop the cached views. Snapshots already handed out stay valid.
    pub fn reload(&self) {
        debug!("Reloading site {:?}", self.site_dir);
        *self
            .site_packages
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .package_containers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// A target for a directory nested in this one, sharing runtime and environment.
    pub fn nested(&self, site_dir: impl Into<PathBuf>) -> Self {
        Self::with_environment(self.runtime.clone(), site_dir, self.env.clone())
    }
}

impl std::fmt::Debug for InstallationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationTarget")
            .field("site_dir", &self.site_dir)
            .field("env", &self.env)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{ManifestPackage, Package, StoreMode};
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use tempfile::tempdir;

    #[test]
    fn test_paths() {
        let target = InstallationTarget::new(Arc::new(MockRuntime::new()), "/site");
        assert_eq!(target.package_dir("Foo_Bar"), PathBuf::from("/site/foo-bar"));
        assert_eq!(
            target.store_dir("Foo", &"1.2".parse().unwrap()),
            PathBuf::from("/site/.store/foo-1.2")
        );
    }

    #[test]
    fn test_site_packages_cached_until_reload() {
        let mut runtime = MockRuntime::new();

        // --- Site root is scanned exactly twice: first access and after reload ---
        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/site")))
            .times(2)
            .returning(|_| false);

        let target = InstallationTarget::new(Arc::new(runtime), "/site");
        let first = target.site_packages().unwrap();
        let second = target.site_packages().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        target.reload();
        let third = target.site_packages().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.is_empty());
    }

    #[test]
    fn test_reload_reflects_new_installs() {
        let dir = tempdir().unwrap();
        let target = InstallationTarget::new(Arc::new(RealRuntime), dir.path());
        assert!(target.site_packages().unwrap().is_empty());

        ManifestPackage::new("foo", "1.0".parse().unwrap())
            .install_to(&target, None, StoreMode::Copy)
            .unwrap();

        let stale = target.site_packages().unwrap();
        assert!(stale.is_empty());

        target.reload();
        assert!(target.site_packages().unwrap().contains("foo"));
        assert!(stale.is_empty());
    }

    #[test]
    fn test_package_containers_follow_site_snapshot() {
        let dir = tempdir().unwrap();
        let target = InstallationTarget::new(Arc::new(RealRuntime), dir.path());
        let mut app = ManifestPackage::new("app-containerized", "1.0".parse().unwrap());
        app.containerized = true;
        app.install_to(&target, None, StoreMode::Copy).unwrap();
        ManifestPackage::new("plain", "1.0".parse().unwrap())
            .install_to(&target, None, StoreMode::Copy)
            .unwrap();

        let containers = target.package_containers().unwrap();
        assert_eq!(containers.containers().len(), 1);
        assert!(Arc::ptr_eq(&containers, &target.package_containers().unwrap()));
        assert!(containers.container_of("app").is_some());

        std::fs::remove_dir_all(dir.path().join("app-containerized")).unwrap();
        target.reload();
        assert!(target.package_containers().unwrap().containers().is_empty());
    }

    #[test]
    fn test_environment_tag() {
        let env = Environment {
            platform: "linux".into(),
            arch: "aarch64".into(),
        };
        assert_eq!(env.platform_tag(), "linux-aarch64");
        assert_eq!(Environment::current().platform, std::env::consts::OS);
    }
}
