//! Error types for planning and executing installations.

use thiserror::Error;

use crate::executor::ExecutionReport;
use crate::package::{PackageDescriptor, PackageOperation};

/// Failure reported by a [`crate::resolver::DependencyResolver`].
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No consistent assignment of package versions exists.
    #[error("Unsolvable dependency constraints: {0}")]
    Unsolvable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResolveError {
    pub fn is_unsolvable(&self) -> bool {
        matches!(self, ResolveError::Unsolvable(_))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A package was asked to do something it cannot do. Always a planning defect.
    #[error("Package {package} does not support {operation}")]
    UnsupportedOperation {
        package: String,
        operation: &'static str,
    },

    /// At least one package operation failed; siblings that had not started were cancelled.
    #[error("{operation} of {package} failed ({failed} of {total} operations failed, {cancelled} cancelled)")]
    Execution {
        package: PackageDescriptor,
        operation: PackageOperation,
        failed: usize,
        cancelled: usize,
        total: usize,
        report: ExecutionReport,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn unsupported(package: &PackageDescriptor, operation: &'static str) -> Self {
        Error::UnsupportedOperation {
            package: package.to_string(),
            operation,
        }
    }

    /// Report of the execution that produced this error, if any.
    pub fn execution_report(&self) -> Option<&ExecutionReport> {
        match self {
            Error::Execution { report, .. } => Some(report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
