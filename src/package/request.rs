use anyhow::Result;

use super::{Dependency, Package, PackageDescriptor, PackageKind, StoreMode};
use crate::site::InstallationTarget;
use crate::version::{Version, VersionSpecifier};

/// Name of the synthetic root package.
pub const REQUEST_PACKAGE_NAME: &str = "installation request";

/// Synthetic root whose dependencies are exactly the requested ones.
///
/// Every resolver call needs a single root; this package gives it one for a set
/// of unrelated dependencies. Installing, updating or uninstalling it does nothing.
#[derive(Debug, Clone)]
pub struct UserRequestPackage {
    descriptor: PackageDescriptor,
    requested: Vec<Dependency>,
}

impl UserRequestPackage {
    pub fn new(requested: impl IntoIterator<Item = Dependency>) -> Self {
        Self {
            descriptor: PackageDescriptor::new(REQUEST_PACKAGE_NAME, Version::standard(&[0])),
            requested: requested.into_iter().collect(),
        }
    }

    pub fn requested(&self) -> &[Dependency] {
        &self.requested
    }

    /// The dependency that resolves to this package.
    pub fn to_dependency(&self) -> Dependency {
        Dependency::new(
            self.descriptor.name.clone(),
            VersionSpecifier::Exact(self.descriptor.version.clone()),
        )
    }
}

impl Package for UserRequestPackage {
    fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    fn kind(&self) -> PackageKind {
        PackageKind::Request
    }

    fn dependencies(&self, _target: &InstallationTarget, _extras: &[String]) -> Result<Vec<Dependency>> {
        Ok(self.requested.clone())
    }

    fn install_to(&self, _: &InstallationTarget, _: Option<&Dependency>, _: StoreMode) -> Result<()> {
        Ok(())
    }

    fn update_at(&self, _: &InstallationTarget, _: Option<&Dependency>, _: StoreMode) -> Result<()> {
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        Ok(())
    }
}
