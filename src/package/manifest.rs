use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use super::record::INSTALLER;
use super::{
    Dependency, InstallationInfo, InstallationRecord, InstalledPackage, Package,
    PackageDescriptor, PackageKind, RECORD_FILE, StoreMode,
};
use crate::executor::TransferPayload;
use crate::site::{Environment, InstallationTarget};
use crate::version::Version;

/// A self-describing package candidate: metadata plus the contents of every file
/// it installs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ManifestPackage {
    #[serde(flatten)]
    descriptor: PackageDescriptor,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub extras: BTreeMap<String, Vec<Dependency>>,
    /// `os` or `os-arch` entries this package runs on; empty means everywhere.
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub containerized: bool,
    /// Relative path to file contents.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl ManifestPackage {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            descriptor: PackageDescriptor::new(name, version),
            dependencies: Vec::new(),
            extras: BTreeMap::new(),
            platforms: Vec::new(),
            containerized: false,
            files: BTreeMap::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platforms.push(platform.into());
        self
    }

    fn validate_file_path(path: &str) -> Result<PathBuf> {
        let relative = PathBuf::from(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || relative.file_name().is_none() {
            bail!("Refusing to install file outside the package directory: {:?}", path);
        }
        Ok(relative)
    }

    /// Write the package files and record into `target`. The record goes last so
    /// a half-written directory never shows up as installed.
    fn write_installation(
        &self,
        target: &InstallationTarget,
        user_request: Option<&Dependency>,
        store_mode: StoreMode,
    ) -> Result<()> {
        let runtime = target.runtime();
        let dir = target.package_dir(&self.descriptor.name);
        let store_mode = store_mode.resolve();

        if Self::package_dir_has_record(target, &dir) {
            match InstalledPackage::load(runtime.clone(), &dir) {
                Ok(previous) => previous.remove_store()?,
                Err(e) => debug!("Ignoring unreadable record in {:?}: {:#}", dir, e),
            }
        }
        if runtime.exists(&dir) {
            debug!("Clearing leftover directory {:?}", dir);
            runtime.remove_dir_all(&dir)?;
        }
        runtime.create_dir_all(&dir)?;

        let store = target.store_dir(&self.descriptor.name, &self.descriptor.version);
        for (name, contents) in &self.files {
            let relative = Self::validate_file_path(name)?;
            let dest = dir.join(&relative);
            if let Some(parent) = dest.parent() {
                runtime.create_dir_all(parent)?;
            }

            match store_mode {
                StoreMode::Link => {
                    let stored = store.join(&relative);
                    if !runtime.exists(&stored) {
                        if let Some(parent) = stored.parent() {
                            runtime.create_dir_all(parent)?;
                        }
                        runtime.write(&stored, contents.as_bytes())?;
                    }
                    runtime.symlink(&stored, &dest)?;
                }
                _ => runtime.write(&dest, contents.as_bytes())?,
            }
        }

        let record = InstallationRecord {
            name: self.descriptor.name.clone(),
            version: self.descriptor.version.clone(),
            dependencies: self.dependencies.clone(),
            extras: self.extras.clone(),
            user_request: user_request.cloned(),
            installation_info: InstallationInfo {
                store_mode,
                installer: INSTALLER.to_string(),
                containerized: self.containerized,
            },
            files: self.files.keys().cloned().collect(),
        };
        record.save(runtime.as_ref(), &dir.join(RECORD_FILE))
    }

    fn package_dir_has_record(target: &InstallationTarget, dir: &Path) -> bool {
        target.runtime().exists(&dir.join(RECORD_FILE))
    }
}

impl Package for ManifestPackage {
    fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    fn kind(&self) -> PackageKind {
        PackageKind::Candidate
    }

    fn dependencies(&self, _target: &InstallationTarget, extras: &[String]) -> Result<Vec<Dependency>> {
        let mut deps = self.dependencies.clone();
        for extra in extras {
            match self.extras.get(extra) {
                Some(extra_deps) => deps.extend(extra_deps.iter().cloned()),
                None => warn!("{} does not provide extra '{}'", self.descriptor, extra),
            }
        }
        Ok(deps)
    }

    fn is_compatible_with(&self, env: &Environment) -> bool {
        self.platforms.is_empty()
            || self
                .platforms
                .iter()
                .any(|p| *p == env.platform || *p == env.platform_tag())
    }

    #[tracing::instrument(skip(self, target))]
    fn install_to(
        &self,
        target: &InstallationTarget,
        user_request: Option<&Dependency>,
        store_mode: StoreMode,
    ) -> Result<()> {
        let dir = target.package_dir(&self.descriptor.name);
        if Self::package_dir_has_record(target, &dir) {
            bail!("{} is already installed in {:?}", self.descriptor.name, dir);
        }

        info!("Installing {}", self.descriptor);
        self.write_installation(target, user_request, store_mode)
            .with_context(|| format!("Failed to install {}", self.descriptor))
    }

    /// Replace whatever is installed under this package's name.
    #[tracing::instrument(skip(self, target))]
    fn update_at(
        &self,
        target: &InstallationTarget,
        user_request: Option<&Dependency>,
        store_mode: StoreMode,
    ) -> Result<()> {
        info!("Updating to {}", self.descriptor);
        self.write_installation(target, user_request, store_mode)
            .with_context(|| format!("Failed to update to {}", self.descriptor))
    }

    fn uninstall(&self) -> Result<()> {
        bail!("{} is not installed; uninstall its installed package instead", self.descriptor)
    }

    fn transfer_payload(&self) -> Option<TransferPayload> {
        Some(TransferPayload::Manifest(self.clone()))
    }
}
