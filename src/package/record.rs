use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{Dependency, StoreMode};
use crate::runtime::Runtime;
use crate::version::Version;

/// File name of the installation record inside a package directory.
pub const RECORD_FILE: &str = "record.json";

/// Installer name written into new records.
pub const INSTALLER: &str = concat!("pkgplan ", env!("PKGPLAN_VERSION"));

/// How a package was installed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstallationInfo {
    pub store_mode: StoreMode,
    #[serde(default)]
    pub installer: String,
    /// The package is an application container hosting its own site.
    #[serde(default)]
    pub containerized: bool,
}

impl Default for InstallationInfo {
    fn default() -> Self {
        Self {
            store_mode: StoreMode::Copy,
            installer: INSTALLER.to_string(),
            containerized: false,
        }
    }
}

/// Installation record stored as `<site>/<name_key>/record.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstallationRecord {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub extras: BTreeMap<String, Vec<Dependency>>,
    /// Set when the user asked for this package explicitly.
    #[serde(default)]
    pub user_request: Option<Dependency>,
    #[serde(default)]
    pub installation_info: InstallationInfo,
    /// Paths relative to the package directory.
    #[serde(default)]
    pub files: Vec<String>,
}

impl InstallationRecord {
    #[tracing::instrument(skip(runtime))]
    pub fn load(runtime: &dyn Runtime, path: &Path) -> Result<Self> {
        let content = runtime.read_to_string(path)?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Invalid installation record {:?}", path))?;
        Ok(record)
    }

    /// Write the record through a temporary file so readers never see a partial one.
    #[tracing::instrument(skip(self, runtime))]
    pub fn save(&self, runtime: &dyn Runtime, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        runtime.write(&tmp, json.as_bytes())?;
        if let Err(e) = runtime.rename(&tmp, path) {
            if let Err(cleanup) = runtime.remove_file(&tmp) {
                debug!("Failed to remove {:?}: {:#}", tmp, cleanup);
            }
            return Err(e)
                .with_context(|| format!("Failed to store installation record {:?}", path));
        }
        Ok(())
    }
}
