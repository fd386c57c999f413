//! Concurrent execution of package operations.
//!
//! Every operation becomes a task. Tasks wait for a worker slot (threads, or
//! processes for transferable packages when the process pool is selected), run
//! their single package call, and report a terminal [`TaskState`].
//!
//! Execution is fail-fast: the first failing task trips a shared cancellation
//! token before releasing its slot, so every task still waiting for a slot
//! finishes as `Cancelled`. Tasks already running are left to finish; nothing
//! is rolled back.

mod config;
mod monitor;
mod process;
mod task;

use anyhow::Context;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::package::PackageOperation;
use crate::runtime::Runtime;
use crate::site::InstallationTarget;

pub use config::{
    ConcurrencyMode, ENV_CONCURRENCY, ENV_PROCESSES, ENV_THREADS, ENV_WORKER, ExecutorConfig,
};
pub use monitor::{OperationEvent, OperationMonitor, OperationPhase};
#[cfg(test)]
pub use process::MockRemoteExecutor;
pub use process::{
    RemoteExecutor, SubprocessPool, TransferPayload, TransferRequest, run_transfer_request,
};
pub use task::{ExecutionReport, OperationTask, TaskReport, TaskState, apply_operation};

enum TaskOutcome {
    Completed,
    Failed(anyhow::Error),
    Cancelled,
}

/// Report of the execution in flight, shared with its tasks.
#[derive(Debug, Clone, Default)]
struct Progress(Arc<Mutex<ExecutionReport>>);

impl Progress {
    fn reset(&self, report: ExecutionReport) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = report;
    }

    fn update(&self, index: usize, state: TaskState, error: Option<String>) {
        let mut report = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = report.tasks.get_mut(index) {
            entry.state = state;
            entry.error = error;
        }
    }

    fn snapshot(&self) -> ExecutionReport {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// What a spawned task needs besides the task itself.
#[derive(Clone)]
struct TaskContext {
    target: Arc<InstallationTarget>,
    cancel: CancellationToken,
    monitor: OperationMonitor,
    progress: Progress,
    slots: Arc<Semaphore>,
    remote: Option<Arc<dyn RemoteExecutor>>,
}

impl TaskContext {
    async fn run(
        self,
        index: usize,
        task: OperationTask,
        request: Option<TransferRequest>,
    ) -> TaskOutcome {
        let descriptor = task.descriptor().clone();
        let operation = task.operation;

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.slots.clone().acquire_owned() => permit.ok(),
        };
        let permit = match permit {
            Some(permit) if !self.cancel.is_cancelled() => permit,
            _ => {
                self.monitor
                    .notify(&descriptor, operation, OperationPhase::Cancelled);
                return TaskOutcome::Cancelled;
            }
        };

        self.progress.update(index, TaskState::Running, None);
        self.monitor
            .notify(&descriptor, operation, OperationPhase::Started);
        let result = match (request, &self.remote) {
            (Some(request), Some(remote)) => {
                remote
                    .execute(self.target.site_dir().to_path_buf(), request)
                    .await
            }
            _ => {
                let target = self.target.clone();
                tokio::task::spawn_blocking(move || task.run(&target))
                    .await
                    .context("Operation task panicked")
                    .and_then(|result| result)
            }
        };

        let outcome = match result {
            Ok(()) => TaskOutcome::Completed,
            Err(e) => {
                warn!("{} of {} failed: {:#}", operation, descriptor, e);
                self.cancel.cancel();
                TaskOutcome::Failed(e)
            }
        };
        drop(permit);

        let phase = match outcome {
            TaskOutcome::Completed => OperationPhase::Completed,
            _ => OperationPhase::Failed,
        };
        self.monitor.notify(&descriptor, operation, phase);
        outcome
    }
}

/// Runs operation tasks on the thread pool and, optionally, a process pool.
pub struct Executor {
    config: ExecutorConfig,
    monitor: OperationMonitor,
    threads: Arc<Semaphore>,
    processes: Arc<Semaphore>,
    remote: Option<Arc<dyn RemoteExecutor>>,
    progress: Progress,
}

impl Executor {
    /// An executor without a process pool; see [`with_remote_executor`](Self::with_remote_executor).
    pub fn new(config: ExecutorConfig) -> Self {
        let threads = Arc::new(Semaphore::new(config.thread_slots()));
        let processes = Arc::new(Semaphore::new(config.process_slots()));
        Self {
            config,
            monitor: OperationMonitor::disabled(),
            threads,
            processes,
            remote: None,
            progress: Progress::default(),
        }
    }

    /// Build an executor from `PKGPLAN_*` settings. In process mode the worker
    /// program defaults to the running executable.
    pub fn from_env(runtime: &dyn Runtime) -> Result<Self> {
        let config = ExecutorConfig::from_env(runtime)?;
        let worker = match (&config.mode, &config.worker_program) {
            (ConcurrencyMode::Process, Some(program)) => Some(program.clone()),
            (ConcurrencyMode::Process, None) => Some(runtime.current_exe()?),
            _ => None,
        };

        let executor = Self::new(config);
        Ok(match worker {
            Some(program) => executor.with_remote_executor(Arc::new(SubprocessPool::new(program))),
            None => executor,
        })
    }

    pub fn with_monitor(mut self, monitor: OperationMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_remote_executor(mut self, remote: Arc<dyn RemoteExecutor>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Task states of the latest execution, as they stand right now.
    pub fn progress(&self) -> ExecutionReport {
        self.progress.snapshot()
    }

    /// Run all `tasks` against `target` and wait for every one of them.
    ///
    /// Returns the report on success. If any task failed, returns
    /// [`Error::Execution`] carrying the report and the first failure.
    #[tracing::instrument(skip(self, target, tasks), fields(count = tasks.len()))]
    pub async fn execute(
        &self,
        target: Arc<InstallationTarget>,
        tasks: Vec<OperationTask>,
    ) -> Result<ExecutionReport> {
        self.progress.reset(ExecutionReport::pending(&tasks));
        if tasks.is_empty() {
            return Ok(self.progress.snapshot());
        }

        let requests: Vec<_> = tasks.iter().map(OperationTask::transfer_request).collect();
        let remote = self.process_pool_for(&requests);
        let cancel = CancellationToken::new();
        let mut join_set = JoinSet::new();

        for (index, (task, request)) in tasks.into_iter().zip(requests).enumerate() {
            let (slots, request) = match (&remote, request) {
                (Some(_), Some(request)) => (self.processes.clone(), Some(request)),
                _ => (self.threads.clone(), None),
            };
            debug!(
                "Scheduling {} of {} on the {} pool",
                task.operation,
                task.descriptor(),
                if request.is_some() { "process" } else { "thread" }
            );

            let ctx = TaskContext {
                target: target.clone(),
                cancel: cancel.clone(),
                monitor: self.monitor.clone(),
                progress: self.progress.clone(),
                slots,
                remote: remote.clone(),
            };
            self.monitor
                .notify(task.descriptor(), task.operation, OperationPhase::Scheduled);
            self.progress.update(index, TaskState::Scheduled, None);
            join_set.spawn(async move { (index, ctx.run(index, task, request).await) });
        }

        let mut first_failure = None;
        while let Some(joined) = join_set.join_next().await {
            let (index, outcome) = joined.context("Operation task panicked")?;
            match outcome {
                TaskOutcome::Completed => self.progress.update(index, TaskState::Completed, None),
                TaskOutcome::Cancelled => self.progress.update(index, TaskState::Cancelled, None),
                TaskOutcome::Failed(e) => {
                    self.progress
                        .update(index, TaskState::Failed, Some(format!("{:#}", e)));
                    if first_failure.is_none() {
                        first_failure = Some((index, e));
                    }
                }
            }
        }
        let report = self.progress.snapshot();

        let Some((index, source)) = first_failure else {
            info!("Executed {} operation(s)", report.len());
            return Ok(report);
        };

        let failed = report.failed();
        let cancelled = report.cancelled();
        info!(
            "Execution failed: {} failed, {} cancelled, {} completed",
            failed,
            cancelled,
            report.completed()
        );
        let package = report.tasks[index].descriptor.clone();
        let operation: PackageOperation = report.tasks[index].operation;
        Err(Error::Execution {
            package,
            operation,
            failed,
            cancelled,
            total: report.len(),
            report,
            source: source.into(),
        })
    }

    /// The process pool, when it is selected and more than one task can use it.
    fn process_pool_for(
        &self,
        requests: &[Option<TransferRequest>],
    ) -> Option<Arc<dyn RemoteExecutor>> {
        if self.config.mode != ConcurrencyMode::Process {
            return None;
        }
        let remote = self.remote.as_ref()?;
        let transferable = requests.iter().filter(|r| r.is_some()).count();
        (transferable > 1).then(|| remote.clone())
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("process_pool", &self.remote.is_some())
            .finish()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Package, StoreMode};
    use crate::test_utils::{ScriptedPackage, candidate, memory_target};
    use std::time::Duration;

    fn config(mode: ConcurrencyMode, threads: usize) -> ExecutorConfig {
        ExecutorConfig {
            mode,
            threads,
            processes: 2,
            worker_program: None,
        }
    }

    fn task(package: Arc<dyn Package>) -> OperationTask {
        OperationTask::new(package, PackageOperation::Install, StoreMode::Auto, None)
    }

    #[test_log::test(tokio::test)]
    async fn test_all_tasks_complete() {
        let executor = Executor::new(config(ConcurrencyMode::Thread, 4));
        let packages: Vec<Arc<ScriptedPackage>> = (0..5)
            .map(|i| Arc::new(ScriptedPackage::new(&format!("p{}", i), "1.0")))
            .collect();
        let tasks = packages.iter().map(|p| task(p.clone())).collect();

        let report = executor
            .execute(Arc::new(memory_target()), tasks)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.completed(), 5);
        for p in &packages {
            assert_eq!(p.calls(), vec![PackageOperation::Install]);
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_execution() {
        let executor = Executor::default();
        let report = executor
            .execute(Arc::new(memory_target()), vec![])
            .await
            .unwrap();
        assert!(report.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_first_failure_cancels_waiting_tasks() {
        let executor = Executor::new(config(ConcurrencyMode::Thread, 1));
        let failing = Arc::new(ScriptedPackage::new("broken", "1.0").failing());
        let others: Vec<Arc<ScriptedPackage>> = (0..3)
            .map(|i| Arc::new(ScriptedPackage::new(&format!("ok{}", i), "1.0")))
            .collect();

        let mut tasks = vec![task(failing.clone())];
        tasks.extend(others.iter().map(|p| task(p.clone())));

        let err = executor
            .execute(Arc::new(memory_target()), tasks)
            .await
            .unwrap_err();

        let Error::Execution {
            package,
            operation,
            failed,
            cancelled,
            total,
            report,
            ..
        } = &err
        else {
            panic!("expected execution error, got {:?}", err);
        };
        assert_eq!(package.name, "broken");
        assert_eq!(*operation, PackageOperation::Install);
        assert_eq!(*failed, 1);
        assert_eq!(*total, 4);
        assert_eq!(*cancelled, 3);
        let broken = report.task("broken").unwrap();
        assert_eq!(broken.state, TaskState::Failed);
        assert!(broken.error.as_deref().unwrap().contains("scripted failure"));
        for p in &others {
            assert!(p.calls().is_empty());
        }
        assert!(err.to_string().starts_with("install of broken 1.0 failed"));
    }

    #[test_log::test(tokio::test)]
    async fn test_none_mode_runs_sequentially() {
        let executor = Executor::new(config(ConcurrencyMode::None, 8));
        let tracker = ScriptedPackage::concurrency_tracker();
        let tasks = (0..4)
            .map(|i| {
                task(Arc::new(
                    ScriptedPackage::new(&format!("p{}", i), "1.0")
                        .with_delay(Duration::from_millis(20))
                        .with_tracker(tracker.clone()),
                ))
            })
            .collect();

        executor
            .execute(Arc::new(memory_target()), tasks)
            .await
            .unwrap();
        assert_eq!(tracker.max(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_monitor_sees_lifecycle() {
        let (monitor, mut rx) = OperationMonitor::channel(16);
        let executor = Executor::new(config(ConcurrencyMode::Thread, 2)).with_monitor(monitor);

        executor
            .execute(
                Arc::new(memory_target()),
                vec![task(Arc::new(ScriptedPackage::new("foo", "1.0")))],
            )
            .await
            .unwrap();

        let mut phases = Vec::new();
        while let Ok(event) = rx.try_recv() {
            phases.push(event.phase);
        }
        assert_eq!(
            phases,
            vec![
                OperationPhase::Scheduled,
                OperationPhase::Started,
                OperationPhase::Completed
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_progress_shows_running_task() {
        let (monitor, mut rx) = OperationMonitor::channel(16);
        let executor = Executor::new(config(ConcurrencyMode::Thread, 1)).with_monitor(monitor);
        let tasks = vec![
            task(Arc::new(
                ScriptedPackage::new("slow", "1.0").with_delay(Duration::from_millis(200)),
            )),
            task(Arc::new(ScriptedPackage::new("queued", "1.0"))),
        ];

        let observe = async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.phase == OperationPhase::Started {
                    return (event.descriptor.name, executor.progress());
                }
            }
        };
        let (result, (started, progress)) =
            tokio::join!(executor.execute(Arc::new(memory_target()), tasks), observe);

        assert_eq!(started, "slow");
        assert_eq!(progress.task("slow").unwrap().state, TaskState::Running);
        assert_eq!(progress.count(TaskState::Running), 1);
        assert_eq!(progress.count(TaskState::Scheduled), 1);

        assert!(result.unwrap().is_success());
        assert_eq!(executor.progress().completed(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_process_pool_used_for_transferable_tasks() {
        let mut remote = MockRemoteExecutor::new();
        remote
            .expect_execute()
            .withf(|_, request| matches!(request.payload, TransferPayload::Manifest(_)))
            .times(2)
            .returning(|_, _| Ok(()));

        let executor = Executor::new(config(ConcurrencyMode::Process, 2))
            .with_remote_executor(Arc::new(remote));
        let scripted = Arc::new(ScriptedPackage::new("local", "1.0"));
        let tasks = vec![
            task(candidate("a", "1.0", &[])),
            task(candidate("b", "1.0", &[])),
            task(scripted.clone()),
        ];

        let report = executor
            .execute(Arc::new(memory_target()), tasks)
            .await
            .unwrap();
        assert_eq!(report.completed(), 3);
        assert_eq!(scripted.calls(), vec![PackageOperation::Install]);
    }

    #[test_log::test(tokio::test)]
    async fn test_single_transferable_task_stays_on_threads() {
        let mut remote = MockRemoteExecutor::new();
        remote.expect_execute().never();

        let executor = Executor::new(config(ConcurrencyMode::Process, 2))
            .with_remote_executor(Arc::new(remote));
        let scripted = Arc::new(ScriptedPackage::new("local", "1.0"));
        let tasks = vec![
            task(Arc::new(
                ScriptedPackage::new("movable", "1.0").transferable(),
            )),
            task(scripted.clone()),
        ];

        executor
            .execute(Arc::new(memory_target()), tasks)
            .await
            .unwrap();
        assert_eq!(scripted.calls(), vec![PackageOperation::Install]);
    }

    #[test_log::test(tokio::test)]
    async fn test_remote_failure_is_reported() {
        let mut remote = MockRemoteExecutor::new();
        remote
            .expect_execute()
            .returning(|_, _| Err(anyhow::anyhow!("worker exploded")));

        let executor = Executor::new(config(ConcurrencyMode::Process, 2))
            .with_remote_executor(Arc::new(remote));
        let tasks = vec![
            task(candidate("a", "1.0", &[])),
            task(candidate("b", "1.0", &[])),
        ];

        let err = executor
            .execute(Arc::new(memory_target()), tasks)
            .await
            .unwrap_err();
        let report = err.execution_report().unwrap();
        assert!(report.failed() >= 1);
        assert_eq!(report.completed(), 0);
        assert!(std::error::Error::source(&err)
            .unwrap()
            .to_string()
            .contains("worker exploded"));
    }

    #[test]
    fn test_from_env_process_mode_uses_worker_program() {
        use crate::runtime::MockRuntime;
        use std::env::VarError;

        let mut runtime = MockRuntime::new();
        runtime.expect_env_var().returning(|key| match key {
            ENV_CONCURRENCY => Ok("proc".into()),
            ENV_WORKER => Ok("/opt/pkgplan".into()),
            _ => Err(VarError::NotPresent),
        });
        runtime.expect_current_exe().never();

        let executor = Executor::from_env(&runtime).unwrap();
        assert_eq!(executor.config().mode, ConcurrencyMode::Process);
        assert!(executor.remote.is_some());
    }
}
