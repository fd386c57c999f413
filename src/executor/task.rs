use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use super::process::TransferRequest;
use crate::package::{Dependency, Package, PackageDescriptor, PackageOperation, StoreMode};
use crate::site::InstallationTarget;

/// Lifecycle of one operation: `Pending -> Scheduled -> Running`, then one of
/// the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// One package operation ready to run.
#[derive(Debug, Clone)]
pub struct OperationTask {
    pub package: Arc<dyn Package>,
    pub operation: PackageOperation,
    pub store_mode: StoreMode,
    pub user_request: Option<Dependency>,
}

impl OperationTask {
    pub fn new(
        package: Arc<dyn Package>,
        operation: PackageOperation,
        store_mode: StoreMode,
        user_request: Option<Dependency>,
    ) -> Self {
        Self {
            package,
            operation,
            store_mode,
            user_request,
        }
    }

    pub fn descriptor(&self) -> &PackageDescriptor {
        self.package.descriptor()
    }

    /// Run the operation in this thread.
    pub fn run(&self, target: &InstallationTarget) -> Result<()> {
        apply_operation(
            self.package.as_ref(),
            self.operation,
            target,
            self.user_request.as_ref(),
            self.store_mode,
        )
    }

    /// The request a worker process needs to run this operation, if the package
    /// can cross a process boundary.
    pub fn transfer_request(&self) -> Option<TransferRequest> {
        Some(TransferRequest {
            operation: self.operation,
            payload: self.package.transfer_payload()?,
            store_mode: self.store_mode,
            user_request: self.user_request.clone(),
        })
    }
}

/// Dispatch `operation` to the matching package call.
pub fn apply_operation(
    package: &dyn Package,
    operation: PackageOperation,
    target: &InstallationTarget,
    user_request: Option<&Dependency>,
    store_mode: StoreMode,
) -> Result<()> {
    match operation {
        PackageOperation::Install => package.install_to(target, user_request, store_mode),
        PackageOperation::Update => package.update_at(target, user_request, store_mode),
        PackageOperation::Remove => package.uninstall(),
        PackageOperation::Skip => Ok(()),
    }
}

/// Final state of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub descriptor: PackageDescriptor,
    pub operation: PackageOperation,
    pub state: TaskState,
    pub error: Option<String>,
}

/// Outcome of every task in one execution, in submission order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub tasks: Vec<TaskReport>,
}

impl ExecutionReport {
    pub(crate) fn pending(tasks: &[OperationTask]) -> Self {
        Self {
            tasks: tasks
                .iter()
                .map(|t| TaskReport {
                    descriptor: t.descriptor().clone(),
                    operation: t.operation,
                    state: TaskState::Pending,
                    error: None,
                })
                .collect(),
        }
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    pub fn completed(&self) -> usize {
        self.count(TaskState::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskState::Failed)
    }

    pub fn cancelled(&self) -> usize {
        self.count(TaskState::Cancelled)
    }

    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Completed)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The report entry for a package, by name.
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        let key = crate::package::normalize_name(name);
        self.tasks.iter().find(|t| t.descriptor.name_key() == key)
    }
}
