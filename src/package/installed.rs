use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    Dependency, InstallationRecord, Package, PackageDescriptor, PackageKind, RECORD_FILE,
    StoreMode,
};
use crate::error::Error;
use crate::executor::TransferPayload;
use crate::runtime::Runtime;
use crate::site::{InstallationTarget, store_path};

/// A package installed in a site, backed by its installation record.
#[derive(Clone)]
pub struct InstalledPackage {
    runtime: Arc<dyn Runtime>,
    dir: PathBuf,
    descriptor: PackageDescriptor,
    record: InstallationRecord,
}

impl InstalledPackage {
    /// Load the package installed in `dir`.
    pub fn load(runtime: Arc<dyn Runtime>, dir: &Path) -> Result<Self> {
        let record = InstallationRecord::load(runtime.as_ref(), &dir.join(RECORD_FILE))?;
        Ok(Self::from_record(runtime, dir.to_path_buf(), record))
    }

    pub fn from_record(runtime: Arc<dyn Runtime>, dir: PathBuf, record: InstallationRecord) -> Self {
        let descriptor = PackageDescriptor::new(record.name.clone(), record.version.clone());
        Self {
            runtime,
            dir,
            descriptor,
            record,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record(&self) -> &InstallationRecord {
        &self.record
    }

    pub fn user_request(&self) -> Option<&Dependency> {
        self.record.user_request.as_ref()
    }

    pub fn is_user_requested(&self) -> bool {
        self.record.user_request.is_some()
    }

    pub fn store_mode(&self) -> StoreMode {
        self.record.installation_info.store_mode
    }

    pub fn is_containerized(&self) -> bool {
        self.record.installation_info.containerized
    }

    /// Rewrite the record with a new user request. Files are left alone.
    pub fn set_user_request(&self, user_request: Option<&Dependency>) -> Result<()> {
        let mut record = self.record.clone();
        record.user_request = user_request.cloned();
        record.save(self.runtime.as_ref(), &self.dir.join(RECORD_FILE))
    }

    /// Demote this package to an incidental dependency.
    pub fn unmark_user_requested(&self) -> Result<()> {
        debug!("Unmarking {} as user requested", self.descriptor);
        self.set_user_request(None)
    }

    /// Link-mode store of this version, in the site holding the package directory.
    fn store_dir(&self) -> Option<PathBuf> {
        let site = self.dir.parent()?;
        Some(store_path(site, &self.descriptor.name, &self.descriptor.version))
    }

    /// Delete this version's file store when the package was installed in link mode.
    pub(crate) fn remove_store(&self) -> Result<()> {
        if self.store_mode() != StoreMode::Link {
            return Ok(());
        }
        match self.store_dir() {
            Some(store) if self.runtime.exists(&store) => {
                debug!("Removing store {:?}", store);
                self.runtime.remove_dir_all(&store)
            }
            _ => Ok(()),
        }
    }

    /// Move the recorded files into (`Link`) or out of (`Copy`) the store.
    ///
    /// Files already in the requested layout are left alone, so an interrupted
    /// move can be resumed.
    fn relayout(&self, store_mode: StoreMode) -> Result<()> {
        let store = self
            .store_dir()
            .with_context(|| format!("{:?} is not inside a site", self.dir))?;

        for file in &self.record.files {
            let path = self.dir.join(file);
            let linked = self.runtime.is_symlink(&path);
            match store_mode {
                StoreMode::Link if !linked => {
                    let contents = self.runtime.read_to_string(&path)?;
                    let stored = store.join(file);
                    if let Some(parent) = stored.parent() {
                        self.runtime.create_dir_all(parent)?;
                    }
                    self.runtime.write(&stored, contents.as_bytes())?;
                    self.runtime.remove_file(&path)?;
                    self.runtime.symlink(&stored, &path)?;
                }
                StoreMode::Copy if linked => {
                    let contents = self.runtime.read_to_string(&path)?;
                    self.runtime.remove_file(&path)?;
                    self.runtime.write(&path, contents.as_bytes())?;
                }
                _ => {}
            }
        }

        if store_mode == StoreMode::Copy && self.runtime.exists(&store) {
            self.runtime.remove_dir_all(&store)?;
        }
        Ok(())
    }

    /// Rewrite the record in place, moving files first when the store mode changes.
    fn rewrite(&self, user_request: Option<&Dependency>, store_mode: StoreMode) -> Result<()> {
        let current = self.store_mode().resolve();
        let wanted = match store_mode {
            StoreMode::Auto => current,
            other => other,
        };

        let mut record = self.record.clone();
        record.user_request = user_request.cloned();
        if wanted != current {
            info!("Moving {} from {:?} to {:?} store mode", self.descriptor, current, wanted);
            self.relayout(wanted)?;
            record.installation_info.store_mode = wanted;
        }
        record.save(self.runtime.as_ref(), &self.dir.join(RECORD_FILE))
    }
}

impl std::fmt::Debug for InstalledPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledPackage")
            .field("descriptor", &self.descriptor)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Package for InstalledPackage {
    fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    fn kind(&self) -> PackageKind {
        PackageKind::Installed
    }

    fn dependencies(&self, _target: &InstallationTarget, extras: &[String]) -> Result<Vec<Dependency>> {
        let mut deps = self.record.dependencies.clone();
        for extra in extras {
            if let Some(extra_deps) = self.record.extras.get(extra) {
                deps.extend(extra_deps.iter().cloned());
            }
        }
        Ok(deps)
    }

    fn install_to(
        &self,
        _target: &InstallationTarget,
        _user_request: Option<&Dependency>,
        _store_mode: StoreMode,
    ) -> Result<()> {
        Err(Error::unsupported(&self.descriptor, "install").into())
    }

    /// Update the same version in place: rewrite the user request and, when a
    /// concrete store mode is asked for, move the files to match it. Works on
    /// the copy installed in `target`, which need not be this package's site.
    #[tracing::instrument(skip(self, target))]
    fn update_at(
        &self,
        target: &InstallationTarget,
        user_request: Option<&Dependency>,
        store_mode: StoreMode,
    ) -> Result<()> {
        let dir = target.package_dir(&self.descriptor.name);
        let result = if dir == self.dir {
            self.rewrite(user_request, store_mode)
        } else {
            debug!("Updating {} in {:?}", self.descriptor, dir);
            InstalledPackage::load(target.runtime().clone(), &dir)
                .and_then(|installed| installed.rewrite(user_request, store_mode))
        };
        result.with_context(|| format!("Failed to update {}", self.descriptor))
    }

    #[tracing::instrument(skip(self))]
    fn uninstall(&self) -> Result<()> {
        info!("Uninstalling {}", self.descriptor);
        self.runtime
            .remove_dir_all(&self.dir)
            .and_then(|_| self.remove_store())
            .with_context(|| format!("Failed to uninstall {}", self.descriptor))
    }

    fn supports_install(&self) -> bool {
        false
    }

    fn transfer_payload(&self) -> Option<TransferPayload> {
        Some(TransferPayload::Installed {
            name: self.descriptor.name.clone(),
        })
    }

    fn as_installed(&self) -> Option<&InstalledPackage> {
        Some(self)
    }
}
