//! Process pool: running package operations in `pkgplan worker` subprocesses.
//!
//! The parent writes one JSON [`TransferRequest`] to the worker's stdin. The
//! worker applies it to the site given by `--site` and exits non-zero on
//! failure, with the error on stderr.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::task::apply_operation;
use crate::package::{Dependency, ManifestPackage, Package, PackageOperation, StoreMode};
use crate::site::InstallationTarget;

/// A package in a form that can be sent to another process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferPayload {
    Manifest(ManifestPackage),
    /// A package already installed in the worker's site, looked up by name.
    Installed { name: String },
}

/// One operation for a worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub operation: PackageOperation,
    pub payload: TransferPayload,
    pub store_mode: StoreMode,
    pub user_request: Option<Dependency>,
}

/// Runs operations outside the current process.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, site_dir: PathBuf, request: TransferRequest) -> Result<()>;
}

/// Starts one worker subprocess per operation.
#[derive(Debug, Clone)]
pub struct SubprocessPool {
    program: PathBuf,
}

impl SubprocessPool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl RemoteExecutor for SubprocessPool {
    #[tracing::instrument(skip(self, request))]
    async fn execute(&self, site_dir: PathBuf, request: TransferRequest) -> Result<()> {
        let body = serde_json::to_vec(&request).context("Failed to encode transfer request")?;

        let mut child = Command::new(&self.program)
            .arg("worker")
            .arg("--site")
            .arg(&site_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start worker {:?}", self.program))?;
        debug!("Started worker {:?} for {:?}", child.id(), request.operation);

        let mut stdin = child.stdin.take().context("Worker stdin is not piped")?;
        stdin
            .write_all(&body)
            .await
            .context("Failed to send transfer request to worker")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for worker")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Worker exited with {}: {}", output.status, stderr.trim());
        }
        Ok(())
    }
}

/// Worker side of the protocol: apply `request` to `target`.
#[tracing::instrument(skip(target))]
pub fn run_transfer_request(target: &InstallationTarget, request: TransferRequest) -> Result<()> {
    let package = match request.payload {
        TransferPayload::Manifest(manifest) => Arc::new(manifest) as Arc<dyn Package>,
        TransferPayload::Installed { name } => {
            let installed = target
                .site_packages()?
                .get(&name)
                .cloned()
                .with_context(|| format!("{} is not installed in {:?}", name, target.site_dir()))?;
            installed as Arc<dyn Package>
        }
    };

    apply_operation(
        package.as_ref(),
        request.operation,
        target,
        request.user_request.as_ref(),
        request.store_mode,
    )
}
