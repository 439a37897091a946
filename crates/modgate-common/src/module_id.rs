//! Module identifiers and interface version arithmetic
//!
//! A module id has the form `name-semver[-prerelease][+build]`, e.g.
//! `mod-users-5.0.1-alpha.2+build7`. The name itself may contain hyphens;
//! the version starts at the first `-` followed by a digit.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Parsed module id: a product name plus an optional semantic version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId {
    name: String,
    version: Option<SemVer>,
}

impl ModuleId {
    /// Parse an id of the form `name[-semver[-pre][+build]]`
    pub fn parse(id: &str) -> GatewayResult<Self> {
        if id.is_empty() {
            return Err(GatewayError::user("empty module id"));
        }
        let bytes = id.as_bytes();
        for (i, _) in id.match_indices('-') {
            if bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) {
                let version = SemVer::parse(&id[i + 1..])?;
                return Ok(Self {
                    name: id[..i].to_string(),
                    version: Some(version),
                });
            }
        }
        Ok(Self {
            name: id.to_string(),
            version: None,
        })
    }

    /// Product name without the version suffix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version component, if the id carries one
    pub fn version(&self) -> Option<&SemVer> {
        self.version.as_ref()
    }

    /// Whether both ids name the same product
    pub fn same_name(&self, other: &ModuleId) -> bool {
        self.name == other.name
    }

    /// Whether both ids carry versions with equal major component
    pub fn same_major(&self, other: &ModuleId) -> bool {
        match (&self.version, &other.version) {
            (Some(a), Some(b)) => a.major() == b.major(),
            _ => false,
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}-{}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Ord for ModuleId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialOrd for ModuleId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordering code for two module ids: `0` left older, `2` equal, `4` left
/// strictly newer. Callers gate on `>= 4` to refuse downgrades; everything
/// else should use the `Ord` impl directly.
pub fn compare_code(a: &ModuleId, b: &ModuleId) -> u8 {
    match a.cmp(b) {
        Ordering::Less => 0,
        Ordering::Equal => 2,
        Ordering::Greater => 4,
    }
}

/// Pick the latest id among `candidates` sharing `name`'s product name.
///
/// Ties between equal versions break on the lexicographically greatest
/// full id. Returns `None` when no candidate matches the name.
pub fn latest_of<'a, I>(name: &ModuleId, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(ModuleId, &str)> = None;
    for cand in candidates {
        let Ok(mid) = ModuleId::parse(cand) else {
            continue;
        };
        if !mid.same_name(name) {
            continue;
        }
        let better = match &best {
            None => true,
            Some((best_id, best_raw)) => {
                mid.cmp(best_id).then_with(|| cand.cmp(best_raw)) == Ordering::Greater
            }
        };
        if better {
            best = Some((mid, cand));
        }
    }
    best.map(|(_, raw)| raw.to_string())
}

/// Semantic version: dotted numeric components, optional pre-release and
/// build metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemVer {
    components: Vec<u64>,
    pre_release: Option<String>,
    build: Option<String>,
}

impl SemVer {
    /// Parse `1.2.3[-pre][+build]`
    pub fn parse(s: &str) -> GatewayResult<Self> {
        let (rest, build) = match s.split_once('+') {
            Some((r, b)) => (r, Some(b.to_string())),
            None => (s, None),
        };
        let (digits, pre_release) = match rest.split_once('-') {
            Some((d, p)) => (d, Some(p.to_string())),
            None => (rest, None),
        };
        let mut components = Vec::new();
        for part in digits.split('.') {
            let n: u64 = part
                .parse()
                .map_err(|_| GatewayError::user(format!("invalid module version: {s}")))?;
            components.push(n);
        }
        Ok(Self {
            components,
            pre_release,
            build,
        })
    }

    /// Major (first) version component
    pub fn major(&self) -> u64 {
        self.components.first().copied().unwrap_or(0)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dotted: Vec<String> = self.components.iter().map(u64::to_string).collect();
        write!(f, "{}", dotted.join("."))?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        // a pre-release sorts before the plain release
        match (&self.pre_release, &other.pre_release) {
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Equal => {}
                ord => return ord,
            },
            (None, None) => {}
        }
        self.build.cmp(&other.build)
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Interface version `major.minor`
///
/// A provided version satisfies a required one when the majors match and
/// the provided minor is at least the required minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
}

impl InterfaceVersion {
    /// Parse `M.N` (a bare `M` counts as `M.0`)
    pub fn parse(s: &str) -> GatewayResult<Self> {
        let bad = || GatewayError::user(format!("invalid interface version: {s}"));
        let (major, minor) = match s.split_once('.') {
            Some((ma, mi)) => (
                ma.parse().map_err(|_| bad())?,
                mi.parse().map_err(|_| bad())?,
            ),
            None => (s.parse().map_err(|_| bad())?, 0),
        };
        Ok(Self { major, minor })
    }

    /// Whether this provided version satisfies `required`
    pub fn satisfies(&self, required: &InterfaceVersion) -> bool {
        self.major == required.major && self.minor >= required.minor
    }
}

impl fmt::Display for InterfaceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
