use anyhow::Result;
use std::sync::Arc;

use super::Repository;
use crate::package::{Dependency, Package, RemovalPackage, UserRequestPackage};
use crate::site::{Environment, SitePackages};

/// Repository adapter for removal planning: it only ever offers packages that
/// are already installed.
pub struct RemovalRepository {
    request: Arc<UserRequestPackage>,
    site: Arc<SitePackages>,
}

impl RemovalRepository {
    pub fn new(request: Arc<UserRequestPackage>, site: Arc<SitePackages>) -> Self {
        Self { request, site }
    }
}

impl Repository for RemovalRepository {
    fn name(&self) -> &str {
        "removal"
    }

    fn match_dependency(
        &self,
        dependency: &Dependency,
        _env: &Environment,
    ) -> Result<Vec<Arc<dyn Package>>> {
        if dependency.package_name_key() == self.request.name_key() {
            return Ok(vec![self.request.clone() as Arc<dyn Package>]);
        }

        Ok(self
            .site
            .get(&dependency.package_name)
            .map(|installed| {
                Arc::new(RemovalPackage::new(installed.clone(), self.site.clone())) as Arc<dyn Package>
            })
            .into_iter()
            .collect())
    }
}
