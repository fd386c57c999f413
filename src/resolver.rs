//! Dependency resolver contract.
//!
//! The crate does not ship a solver; callers plug one in through
//! [`DependencyResolver`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ResolveError;
use crate::package::{Dependency, Package};
use crate::repository::Repository;
use crate::site::InstallationTarget;

/// Replacement dependencies by normalized package name. Whenever any package
/// depends on a name present here, the resolver uses the override instead.
pub type DependencyOverrides = HashMap<String, Dependency>;

#[cfg_attr(test, mockall::automock)]
pub trait DependencyResolver: Send + Sync {
    /// Resolve `root` and everything it transitively depends on, choosing
    /// candidates from `repository`.
    ///
    /// The result holds one package per name, the package matching `root`
    /// included. Fails with [`ResolveError::Unsolvable`] when no consistent
    /// choice exists.
    fn resolve(
        &self,
        root: &Dependency,
        target: &InstallationTarget,
        repository: &dyn Repository,
        overrides: &DependencyOverrides,
    ) -> Result<Vec<Arc<dyn Package>>, ResolveError>;
}
