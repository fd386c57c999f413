use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::normalize_name;
use crate::version::{Version, VersionSpecifier};

/// A requirement on a package: `name[extra,..] <specifier>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dependency {
    pub package_name: String,
    pub version_spec: VersionSpecifier,
    pub extras: Vec<String>,
}

impl Dependency {
    pub fn new(package_name: impl Into<String>, version_spec: VersionSpecifier) -> Self {
        Self {
            package_name: package_name.into(),
            version_spec,
            extras: Vec::new(),
        }
    }

    pub fn with_extras(mut self, extras: impl IntoIterator<Item = String>) -> Self {
        self.extras = extras.into_iter().collect();
        self.extras.sort();
        self.extras.dedup();
        self
    }

    pub fn package_name_key(&self) -> String {
        normalize_name(&self.package_name)
    }

    pub fn is_allow_all(&self) -> bool {
        self.version_spec.is_allow_all()
    }

    pub fn allows(&self, version: &Version) -> bool {
        self.version_spec.allows(version)
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.package_name_key() == other.package_name_key()
            && self.version_spec == other.version_spec
            && self.extras == other.extras
    }
}

impl Eq for Dependency {}

impl FromStr for Dependency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let name_end = s
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(s.len());
        let (name, mut rest) = s.split_at(name_end);
        if name.is_empty() {
            bail!("Missing package name in dependency '{}'", s);
        }

        let mut extras = Vec::new();
        if let Some(after) = rest.trim_start().strip_prefix('[') {
            let close = after
                .find(']')
                .with_context(|| format!("Unterminated extras in dependency '{}'", s))?;
            extras = after[..close]
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
            rest = &after[close + 1..];
        }

        let version_spec = rest
            .parse()
            .with_context(|| format!("Invalid dependency '{}'", s))?;

        Ok(Dependency::new(name, version_spec).with_extras(extras))
    }
}

impl TryFrom<String> for Dependency {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dependency> for String {
    fn from(value: Dependency) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package_name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if !self.version_spec.is_allow_all() {
            write!(f, "{}", self.version_spec)?;
        }
        Ok(())
    }
}
