//! Candidate repositories.
//!
//! A [`Repository`] answers "which packages could satisfy this dependency" in
//! preference order. The planner never hands the caller's repository to the
//! resolver directly; it wraps it in one of the policy adapters below.

mod installation;
mod removal;

use anyhow::Result;
use std::sync::Arc;

use crate::package::{Dependency, Package};
use crate::site::Environment;

pub use installation::{InstallationRepository, PlanMode};
pub use removal::RemovalRepository;

#[cfg_attr(test, mockall::automock)]
pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    /// Candidates for `dependency` compatible with `env`, most preferred first.
    fn match_dependency(
        &self,
        dependency: &Dependency,
        env: &Environment,
    ) -> Result<Vec<Arc<dyn Package>>>;
}
