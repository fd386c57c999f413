pub mod error;
pub mod executor;
pub mod package;
pub mod plan;
pub mod repository;
pub mod resolver;
pub mod runtime;
pub mod site;
pub mod version;

pub use error::{Error, ResolveError, Result};
pub use plan::{InstallationPlan, InstallationPlanner, PlanOptions};
