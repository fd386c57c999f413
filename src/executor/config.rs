use std::env::VarError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::runtime::Runtime;

pub const ENV_CONCURRENCY: &str = "PKGPLAN_CONCURRENCY";
pub const ENV_THREADS: &str = "PKGPLAN_THREADS";
pub const ENV_PROCESSES: &str = "PKGPLAN_PROCESSES";
pub const ENV_WORKER: &str = "PKGPLAN_WORKER";

/// Where package operations run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// One operation at a time.
    None,
    /// Operations run on a pool of blocking threads.
    #[default]
    Thread,
    /// Transferable operations run in worker processes, the rest on threads.
    Process,
}

impl FromStr for ConcurrencyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ConcurrencyMode::None),
            "thread" | "threads" => Ok(ConcurrencyMode::Thread),
            "proc" | "process" | "processes" => Ok(ConcurrencyMode::Process),
            other => Err(Error::Config(format!(
                "unknown concurrency mode '{}', expected none, thread or proc",
                other
            ))),
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConcurrencyMode::None => "none",
            ConcurrencyMode::Thread => "thread",
            ConcurrencyMode::Process => "proc",
        };
        write!(f, "{}", s)
    }
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub mode: ConcurrencyMode,
    pub threads: usize,
    pub processes: usize,
    /// Program started for process-pool workers; defaults to the current executable.
    pub worker_program: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            mode: ConcurrencyMode::default(),
            threads: parallelism,
            processes: parallelism,
            worker_program: None,
        }
    }
}

impl ExecutorConfig {
    /// Read the configuration from `PKGPLAN_*` environment variables, falling back
    /// to defaults for unset ones.
    pub fn from_env(runtime: &dyn Runtime) -> Result<Self> {
        let mut config = Self::default();

        if let Some(mode) = read_var(runtime, ENV_CONCURRENCY)? {
            config.mode = mode.parse()?;
        }
        if let Some(threads) = read_var(runtime, ENV_THREADS)? {
            config.threads = parse_count(ENV_THREADS, &threads)?;
        }
        if let Some(processes) = read_var(runtime, ENV_PROCESSES)? {
            config.processes = parse_count(ENV_PROCESSES, &processes)?;
        }
        config.worker_program = read_var(runtime, ENV_WORKER)?.map(PathBuf::from);

        Ok(config)
    }

    /// Number of operations allowed to run on threads at once.
    pub fn thread_slots(&self) -> usize {
        match self.mode {
            ConcurrencyMode::None => 1,
            _ => self.threads.max(1),
        }
    }

    pub fn process_slots(&self) -> usize {
        self.processes.max(1)
    }
}

fn read_var(runtime: &dyn Runtime, key: &str) -> Result<Option<String>> {
    match runtime.env_var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(Error::Config(format!("{} is not valid unicode", key))),
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}
