//! Version specifiers (`>=1.0,<2`, `==1.2`, `~=1.4`, `*`).

use anyhow::{Context, Result, bail};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::{StandardVersion, Version};

/// One end of a [`VersionRange`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    pub fn exclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }
}

/// A contiguous range of versions; at least one bound is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub min: Option<Bound>,
    pub max: Option<Bound>,
}

impl VersionRange {
    pub fn allows(&self, version: &Version) -> bool {
        let above_min = self.min.as_ref().is_none_or(|b| match version.cmp(&b.version) {
            Ordering::Greater => true,
            Ordering::Equal => b.inclusive,
            Ordering::Less => false,
        });
        let below_max = self.max.as_ref().is_none_or(|b| match version.cmp(&b.version) {
            Ordering::Less => true,
            Ordering::Equal => b.inclusive,
            Ordering::Greater => false,
        });
        above_min && below_max
    }
}

/// Constraint on the versions a dependency accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum VersionSpecifier {
    #[default]
    AllowAll,
    Exact(Version),
    Range(VersionRange),
}

impl VersionSpecifier {
    /// `>= version`
    pub fn at_least(version: Version) -> Self {
        VersionSpecifier::Range(VersionRange {
            min: Some(Bound::inclusive(version)),
            max: None,
        })
    }

    pub fn is_allow_all(&self) -> bool {
        matches!(self, VersionSpecifier::AllowAll)
    }

    pub fn allows(&self, version: &Version) -> bool {
        match self {
            VersionSpecifier::AllowAll => true,
            VersionSpecifier::Exact(v) => v == version,
            VersionSpecifier::Range(range) => range.allows(version),
        }
    }

    /// Versions allowed by both specifiers, or `None` when nothing is.
    pub fn intersect(&self, other: &VersionSpecifier) -> Option<VersionSpecifier> {
        match (self, other) {
            (VersionSpecifier::AllowAll, x) | (x, VersionSpecifier::AllowAll) => Some(x.clone()),
            (VersionSpecifier::Exact(v), x) | (x, VersionSpecifier::Exact(v)) => {
                x.allows(v).then(|| VersionSpecifier::Exact(v.clone()))
            }
            (VersionSpecifier::Range(a), VersionSpecifier::Range(b)) => {
                let min = tighter(a.min.as_ref(), b.min.as_ref(), Ordering::Greater);
                let max = tighter(a.max.as_ref(), b.max.as_ref(), Ordering::Less);
                match (&min, &max) {
                    (Some(lo), Some(hi)) => match lo.version.cmp(&hi.version) {
                        Ordering::Less => Some(VersionSpecifier::Range(VersionRange { min, max })),
                        Ordering::Equal if lo.inclusive && hi.inclusive => {
                            Some(VersionSpecifier::Exact(lo.version.clone()))
                        }
                        _ => None,
                    },
                    _ => Some(VersionSpecifier::Range(VersionRange { min, max })),
                }
            }
        }
    }
}

/// Pick the more restrictive of two bounds; `prefer` is the ordering that wins.
fn tighter(a: Option<&Bound>, b: Option<&Bound>, prefer: Ordering) -> Option<Bound> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => match x.version.cmp(&y.version) {
            Ordering::Equal => Some(Bound {
                version: x.version.clone(),
                inclusive: x.inclusive && y.inclusive,
            }),
            ord if ord == prefer => Some(x.clone()),
            _ => Some(y.clone()),
        },
    }
}

fn parse_clause(clause: &str) -> Result<VersionSpecifier> {
    let clause = clause.trim();
    if clause.is_empty() || clause == "*" {
        return Ok(VersionSpecifier::AllowAll);
    }

    let split = clause
        .find(|c: char| !matches!(c, '=' | '<' | '>' | '~' | '!'))
        .unwrap_or(clause.len());
    let (op, rest) = clause.split_at(split);
    let version: Version = rest
        .parse()
        .with_context(|| format!("Invalid version in specifier '{}'", clause))?;

    let range = |min: Option<Bound>, max: Option<Bound>| {
        VersionSpecifier::Range(VersionRange { min, max })
    };

    Ok(match op {
        "==" | "=" | "" => VersionSpecifier::Exact(version),
        ">=" => range(Some(Bound::inclusive(version)), None),
        ">" => range(Some(Bound::exclusive(version)), None),
        "<=" => range(None, Some(Bound::inclusive(version))),
        "<" => range(None, Some(Bound::exclusive(version))),
        "~=" => {
            let release = match version.as_standard() {
                Some(v) if v.release().len() >= 2 => v.release().to_vec(),
                _ => bail!(
                    "Compatible release clause '{}' needs a version with at least two components",
                    clause
                ),
            };
            let mut upper = release[..release.len() - 1].to_vec();
            if let Some(last) = upper.last_mut() {
                *last = match last.checked_add(1) {
                    Some(next) => next,
                    None => bail!("Compatible release clause '{}' has no upper bound", clause),
                };
            }
            range(
                Some(Bound::inclusive(version)),
                Some(Bound::exclusive(Version::Standard(StandardVersion::new(upper)))),
            )
        }
        other => bail!("Unsupported version operator '{}' in '{}'", other, clause),
    })
}

impl FromStr for VersionSpecifier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut spec = VersionSpecifier::AllowAll;
        for clause in s.split(',') {
            let parsed = parse_clause(clause)?;
            spec = spec
                .intersect(&parsed)
                .with_context(|| format!("Version specifier '{}' allows no version", s))?;
        }
        Ok(spec)
    }
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpecifier::AllowAll => write!(f, "*"),
            VersionSpecifier::Exact(v) => write!(f, "=={}", v),
            VersionSpecifier::Range(range) => {
                let mut clauses = Vec::new();
                if let Some(b) = &range.min {
                    clauses.push(format!("{}{}", if b.inclusive { ">=" } else { ">" }, b.version));
                }
                if let Some(b) = &range.max {
                    clauses.push(format!("{}{}", if b.inclusive { "<=" } else { "<" }, b.version));
                }
                write!(f, "{}", clauses.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn spec(s: &str) -> VersionSpecifier {
        s.parse().unwrap()
    }

    #[test]
    fn test_allow_all() {
        assert!(spec("").is_allow_all());
        assert!(spec("*").is_allow_all());
        assert!(spec("*").allows(&v("0.0.1")));
        assert!(spec("*").allows(&v("weird")));
    }

    #[test]
    fn test_exact() {
        let s = spec("==1.2");
        assert!(s.allows(&v("1.2.0")));
        assert!(!s.allows(&v("1.2.1")));
        assert_eq!(s.to_string(), "==1.2");
    }

    #[test]
    fn test_range_clauses() {
        let s = spec(">=1.0, <2");
        assert!(s.allows(&v("1.0")));
        assert!(s.allows(&v("1.9.9")));
        assert!(!s.allows(&v("2.0")));
        assert!(!s.allows(&v("0.9")));
        assert_eq!(s.to_string(), ">=1.0,<2");

        let s = spec(">1.0,<=1.5");
        assert!(!s.allows(&v("1.0")));
        assert!(s.allows(&v("1.5")));
    }

    #[test]
    fn test_compatible_release() {
        let s = spec("~=1.4.2");
        assert!(s.allows(&v("1.4.9")));
        assert!(!s.allows(&v("1.5")));

        let s = spec("~=1.4");
        assert!(s.allows(&v("1.9")));
        assert!(!s.allows(&v("2.0")));

        assert!("~=1".parse::<VersionSpecifier>().is_err());
        assert!(
            "~=18446744073709551615.0"
                .parse::<VersionSpecifier>()
                .is_err()
        );
    }

    #[test]
    fn test_intersection_collapses_to_exact() {
        assert_eq!(spec(">=1.2,<=1.2"), VersionSpecifier::Exact(v("1.2")));
        assert_eq!(spec("==1.2,>=1.0"), VersionSpecifier::Exact(v("1.2")));
    }

    #[test]
    fn test_tighter_bounds_win() {
        assert_eq!(spec(">=1.0,>=1.5,<3,<2"), spec(">=1.5,<2"));
        assert_eq!(spec(">=1.0,>1.0"), spec(">1.0"));
    }

    #[test]
    fn test_empty_intersection_is_error() {
        assert!(">=2,<1".parse::<VersionSpecifier>().is_err());
        assert!("==1.0,>=2".parse::<VersionSpecifier>().is_err());
        assert!(">1.0,<1.0".parse::<VersionSpecifier>().is_err());
    }

    #[test]
    fn test_unsupported_operator() {
        let err = "!=1.0".parse::<VersionSpecifier>().unwrap_err();
        assert!(err.to_string().contains("Unsupported version operator"));
    }

    #[test]
    fn test_at_least() {
        let s = VersionSpecifier::at_least(v("1.4"));
        assert!(s.allows(&v("1.4")));
        assert!(s.allows(&v("7")));
        assert!(!s.allows(&v("1.3.9")));
    }
}
