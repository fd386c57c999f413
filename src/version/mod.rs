//! Package versions and version specifiers.
//!
//! Versions made only of dotted numbers (optionally prefixed with `v`) are
//! "standard" and compare numerically, with trailing zero components ignored
//! (`1.0 == 1.0.0`). Anything else is kept verbatim and compared as a string,
//! always ordering below standard versions.

mod specifier;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

pub use specifier::{Bound, VersionRange, VersionSpecifier};

/// A numeric release version such as `1.4.2`.
#[derive(Debug, Clone)]
pub struct StandardVersion {
    release: Vec<u64>,
}

impl StandardVersion {
    pub fn new(release: Vec<u64>) -> Self {
        Self { release }
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Release components with insignificant trailing zeros removed.
    fn significant(&self) -> &[u64] {
        let end = self
            .release
            .iter()
            .rposition(|c| *c != 0)
            .map_or(0, |i| i + 1);
        &self.release[..end]
    }

    /// The version truncated to `major.minor`.
    pub fn without_patch(&self) -> StandardVersion {
        StandardVersion::new(self.release.iter().take(2).copied().collect())
    }
}

impl PartialEq for StandardVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for StandardVersion {}

impl Ord for StandardVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

impl PartialOrd for StandardVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for StandardVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl fmt::Display for StandardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// A package version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Version {
    Standard(StandardVersion),
    Other(String),
}

impl Version {
    pub fn standard(release: &[u64]) -> Self {
        Version::Standard(StandardVersion::new(release.to_vec()))
    }

    pub fn as_standard(&self) -> Option<&StandardVersion> {
        match self {
            Version::Standard(v) => Some(v),
            Version::Other(_) => None,
        }
    }

    /// `major.minor` of a standard version; `None` for non-standard schemes.
    pub fn without_patch(&self) -> Option<Version> {
        self.as_standard()
            .map(|v| Version::Standard(v.without_patch()))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Version::Standard(a), Version::Standard(b)) => a.cmp(b),
            (Version::Other(a), Version::Other(b)) => a.cmp(b),
            (Version::Other(_), Version::Standard(_)) => Ordering::Less,
            (Version::Standard(_), Version::Other(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            bail!("Empty version string");
        }

        let digits = s.strip_prefix(|c: char| c == 'v' || c == 'V').unwrap_or(s);
        let release: Option<Vec<u64>> = digits
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    None
                } else {
                    part.parse::<u64>().ok()
                }
            })
            .collect();

        Ok(match release {
            Some(release) => Version::Standard(StandardVersion::new(release)),
            None => Version::Other(s.to_string()),
        })
    }
}

impl TryFrom<String> for Version {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Standard(v) => write!(f, "{}", v),
            Version::Other(s) => write!(f, "{}", s),
        }
    }
}
