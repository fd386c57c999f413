//! Package model
//!
//! Packages come in four variants that all implement [`Package`]:
//!
//! - [`ManifestPackage`] - a resolved candidate that knows how to lay out its own files
//! - [`InstalledPackage`] - a package backed by an installation record in a site
//! - [`UserRequestPackage`] - the synthetic root handed to the resolver
//! - [`RemovalPackage`] - an installed package viewed by removal planning

mod dependency;
mod installed;
mod manifest;
mod record;
mod removal;
mod request;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::executor::TransferPayload;
use crate::site::{Environment, InstallationTarget};
use crate::version::Version;

pub use dependency::Dependency;
pub use installed::InstalledPackage;
pub use manifest::ManifestPackage;
pub use record::{InstallationInfo, InstallationRecord, RECORD_FILE};
pub use removal::RemovalPackage;
pub use request::{REQUEST_PACKAGE_NAME, UserRequestPackage};

/// Normalize a package name for lookups: lowercase, with every run of
/// `-`, `_` and `.` collapsed into a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Package identity: a name and a version. Two descriptors are equal when their
/// normalized names and versions are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: Version,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn name_key(&self) -> String {
        normalize_name(&self.name)
    }
}

impl PartialEq for PackageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name_key() == other.name_key() && self.version == other.version
    }
}

impl Eq for PackageDescriptor {}

impl Hash for PackageDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name_key().hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for PackageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Which [`Package`] variant a trait object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Candidate,
    Installed,
    Request,
    Removal,
}

/// What the executor does with a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageOperation {
    Install,
    Update,
    Remove,
    Skip,
}

impl fmt::Display for PackageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageOperation::Install => "install",
            PackageOperation::Update => "update",
            PackageOperation::Remove => "remove",
            PackageOperation::Skip => "skip",
        };
        write!(f, "{}", s)
    }
}

/// How a package's files are laid out in the site.
///
/// `Auto` is only ever requested; installation records always hold the mode
/// that was actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    #[default]
    Auto,
    /// Files are written into the package directory.
    Copy,
    /// Files live once in the site store and are symlinked into the package directory.
    Link,
}

impl StoreMode {
    /// The concrete mode to install with.
    pub fn resolve(self) -> StoreMode {
        match self {
            StoreMode::Auto => StoreMode::Copy,
            other => other,
        }
    }
}

/// Something the planner can resolve and the executor can act on.
///
/// Install, update and uninstall are blocking and are each expected to be atomic
/// from the caller's point of view.
pub trait Package: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &PackageDescriptor;

    fn kind(&self) -> PackageKind;

    fn name_key(&self) -> String {
        self.descriptor().name_key()
    }

    /// Dependencies of this package when installed into `target` with the given extras.
    fn dependencies(&self, target: &InstallationTarget, extras: &[String]) -> Result<Vec<Dependency>>;

    fn is_compatible_with(&self, _env: &Environment) -> bool {
        true
    }

    fn install_to(
        &self,
        target: &InstallationTarget,
        user_request: Option<&Dependency>,
        store_mode: StoreMode,
    ) -> Result<()>;

    fn update_at(
        &self,
        target: &InstallationTarget,
        user_request: Option<&Dependency>,
        store_mode: StoreMode,
    ) -> Result<()>;

    fn uninstall(&self) -> Result<()>;

    /// Whether `install_to` may be called at all.
    fn supports_install(&self) -> bool {
        true
    }

    /// A serializable form of this package for running its operation in another
    /// process, or `None` when it must stay in this one.
    fn transfer_payload(&self) -> Option<TransferPayload> {
        None
    }

    fn as_installed(&self) -> Option<&InstalledPackage> {
        None
    }
}
