//! Version-specific function resolution.
//!
//! Backend functions may be declared for a range of backend versions, either
//! declaratively ([`VersionRange`]) or through the name grammar
//! `name_v_<a>_to_<b>`, `name_v_<a>_and_above` and `name_v_<a>_and_below`,
//! where `p` stands for the dot (`1p6` is `1.6`).

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::handler::function::{ModuleEntry, ModuleTable};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    #[error("Invalid version string {0:?}")]
    InvalidVersion(String),
    #[error("Invalid version-specific function name {0:?}")]
    InvalidFunctionName(String),
}

/// Dotted numeric version. Missing trailing components compare as zero.
#[derive(Debug, Clone)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn new(parts: &[u64]) -> Self {
        Self(parts.to_vec())
    }

    /// Parses `1.2.3`, ignoring any local suffix after `+`.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let core = s.split('+').next().unwrap_or_default().trim();
        if core.is_empty() {
            return Err(VersionParseError::InvalidVersion(s.to_string()));
        }
        core.split('.')
            .map(|x| x.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map(Version)
            .map_err(|_| VersionParseError::InvalidVersion(s.to_string()))
    }

    pub fn parts(&self) -> &[u64] {
        &self.0
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let n = self.0.len().max(other.0.len());
        for i in 0..n {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                o => return o,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRange {
    /// Inclusive on both ends.
    Between(Version, Version),
    AndAbove(Version),
    AndBelow(Version),
}

impl VersionRange {
    pub fn contains(&self, version: &Version) -> bool {
        match self {
            VersionRange::Between(lo, hi) => lo <= version && version <= hi,
            VersionRange::AndAbove(lo) => lo <= version,
            VersionRange::AndBelow(hi) => version <= hi,
        }
    }
}

impl Display for VersionRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionRange::Between(lo, hi) => write!(f, "{lo} to {hi}"),
            VersionRange::AndAbove(lo) => write!(f, "{lo} and above"),
            VersionRange::AndBelow(hi) => write!(f, "{hi} and below"),
        }
    }
}

fn parse_name_version(name: &str, part: &str) -> Result<Version, VersionParseError> {
    Version::parse(&part.replace('p', "."))
        .map_err(|_| VersionParseError::InvalidFunctionName(name.to_string()))
}

/// Splits a version-suffixed name into its canonical name and range.
///
/// Names without the `_v_` marker, or whose suffix does not follow the
/// grammar, are not version-specific and yield `None`. A suffix that follows
/// the grammar but holds a malformed version is an error.
pub fn parse_versioned_name(name: &str) -> Result<Option<(String, VersionRange)>, VersionParseError> {
    let Some(idx) = name.find("_v_") else {
        return Ok(None);
    };
    let canonical = &name[..idx];
    let suffix = &name[idx + 3..];
    if canonical.is_empty() {
        return Err(VersionParseError::InvalidFunctionName(name.to_string()));
    }
    let range = if let Some(lo) = suffix.strip_suffix("_and_above") {
        VersionRange::AndAbove(parse_name_version(name, lo)?)
    } else if let Some(hi) = suffix.strip_suffix("_and_below") {
        VersionRange::AndBelow(parse_name_version(name, hi)?)
    } else if let Some((lo, hi)) = suffix.split_once("_to_") {
        VersionRange::Between(parse_name_version(name, lo)?, parse_name_version(name, hi)?)
    } else {
        return Ok(None);
    };
    Ok(Some((canonical.to_string(), range)))
}

fn bind_entry(out: &mut Vec<(String, ModuleEntry)>, name: &str, entry: ModuleEntry) {
    match out.iter_mut().find(|(k, _)| k == name) {
        Some(slot) => slot.1 = entry,
        None => out.push((name.to_string(), entry)),
    }
}

/// Produces the table a backend at `version` exposes: every versioned entry
/// whose range contains `version` is bound to its canonical name, later
/// entries overriding earlier ones. Matching ranges win over a plain entry
/// of the canonical name wherever it is declared. Canonical names with no
/// matching range are left as declared.
pub fn resolve_version_specific(table: &ModuleTable, version: &Version) -> Result<ModuleTable, VersionParseError> {
    let mut out: Vec<(String, ModuleEntry)> = Vec::with_capacity(table.entries().len());
    for (name, entry) in table.entries() {
        match entry {
            ModuleEntry::Module(sub) => {
                bind_entry(&mut out, name, ModuleEntry::Module(resolve_version_specific(sub, version)?));
            }
            ModuleEntry::Versioned { .. } => {}
            _ => bind_entry(&mut out, name, entry.clone()),
        }
    }
    for (name, entry) in table.entries() {
        let (canonical, range, function) = match entry {
            ModuleEntry::Function(callable) => match parse_versioned_name(name)? {
                Some((canonical, range)) => (canonical, range, callable),
                None => continue,
            },
            ModuleEntry::Versioned {
                canonical,
                range,
                function,
            } => (canonical.clone(), range.clone(), function),
            _ => continue,
        };
        if range.contains(version) {
            bind_entry(&mut out, &canonical, ModuleEntry::Function(function.clone()));
        }
    }
    Ok(ModuleTable::from_entries(table.location(), out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::function::{BackendFn, backend_fn};
    use crate::handler::wrapper::Callable;
    use crate::value::Value;
    use std::sync::Arc;

    #[test]
    fn test_version_parse_drops_local_suffix() {
        assert_eq!(Version::parse("2.1.0+cu118").unwrap(), Version::new(&[2, 1, 0]));
        assert_eq!(Version::parse("1.5").unwrap(), Version::parse("1.5.0").unwrap());
        assert!(Version::parse("1.x").is_err());
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_name_grammar() {
        let (name, range) = parse_versioned_name("op_v_1p0_to_1p5").unwrap().unwrap();
        assert_eq!(name, "op");
        assert_eq!(range, VersionRange::Between(Version::new(&[1, 0]), Version::new(&[1, 5])));
        let (_, range) = parse_versioned_name("op_v_1p6_and_above").unwrap().unwrap();
        assert_eq!(range, VersionRange::AndAbove(Version::new(&[1, 6])));
        let (_, range) = parse_versioned_name("op_v_0p9_and_below").unwrap().unwrap();
        assert!(range.contains(&Version::new(&[0, 9, 0])));
        assert!(parse_versioned_name("matmul").unwrap().is_none());
        assert!(parse_versioned_name("conv_v_legacy").unwrap().is_none());
        assert!(parse_versioned_name("op_v_1px_to_2").is_err());
    }

    #[test]
    fn test_between_is_inclusive() {
        let range = VersionRange::Between(Version::new(&[1, 0]), Version::new(&[1, 5]));
        assert!(range.contains(&Version::parse("1.5.0").unwrap()));
        assert!(range.contains(&Version::parse("1.0").unwrap()));
        assert!(!range.contains(&Version::parse("1.5.1").unwrap()));
    }

    fn bound<'a>(table: &'a ModuleTable, name: &str) -> Option<&'a BackendFn> {
        match table.get(name)? {
            ModuleEntry::Function(Callable::Raw(f)) => Some(f),
            _ => None,
        }
    }

    #[test]
    fn test_later_matching_entries_override() {
        let generic = backend_fn(|_, _| Ok(Value::from("generic")));
        let wide = backend_fn(|_, _| Ok(Value::from("wide")));
        let narrow = backend_fn(|_, _| Ok(Value::from("narrow")));
        let table = ModuleTable::new("backends.test")
            .callable("op", Callable::Raw(generic.clone()))
            .callable("op_v_1p0_and_above", Callable::Raw(wide.clone()))
            .callable("op_v_1p2_to_1p4", Callable::Raw(narrow.clone()))
            .constant("pi", Value::Float(3.0));

        let resolved = resolve_version_specific(&table, &Version::new(&[1, 3])).unwrap();
        assert!(Arc::ptr_eq(bound(&resolved, "op").unwrap(), &narrow));
        let resolved = resolve_version_specific(&table, &Version::new(&[1, 8])).unwrap();
        assert!(Arc::ptr_eq(bound(&resolved, "op").unwrap(), &wide));
        let resolved = resolve_version_specific(&table, &Version::new(&[0, 1])).unwrap();
        assert!(Arc::ptr_eq(bound(&resolved, "op").unwrap(), &generic));
        assert!(resolved.get("pi").is_some());
    }

    #[test]
    fn test_matching_range_beats_generic_declared_after_it() {
        let generic = backend_fn(|_, _| Ok(Value::from("generic")));
        let versioned = backend_fn(|_, _| Ok(Value::from("versioned")));
        let table = ModuleTable::new("backends.test")
            .callable("op_v_1p0_to_1p5", Callable::Raw(versioned.clone()))
            .versioned("other", VersionRange::AndAbove(Version::new(&[1])), versioned.clone())
            .callable("op", Callable::Raw(generic.clone()))
            .callable("other", Callable::Raw(generic.clone()));

        let resolved = resolve_version_specific(&table, &Version::parse("1.4.0").unwrap()).unwrap();
        assert!(Arc::ptr_eq(bound(&resolved, "op").unwrap(), &versioned));
        assert!(Arc::ptr_eq(bound(&resolved, "other").unwrap(), &versioned));
        let resolved = resolve_version_specific(&table, &Version::parse("0.9").unwrap()).unwrap();
        assert!(Arc::ptr_eq(bound(&resolved, "op").unwrap(), &generic));
        assert!(Arc::ptr_eq(bound(&resolved, "other").unwrap(), &generic));
    }

    #[test]
    fn test_declarative_ranges_resolve_inside_sub_modules() {
        let old = backend_fn(|_, _| Ok(Value::None));
        let new = backend_fn(|_, _| Ok(Value::None));
        let table = ModuleTable::new("backends.test").module(
            "linalg",
            ModuleTable::new("backends.test.linalg")
                .versioned("matmul", VersionRange::AndBelow(Version::new(&[0, 8])), old.clone())
                .versioned("matmul", VersionRange::AndAbove(Version::new(&[0, 9])), new.clone()),
        );
        let resolved = resolve_version_specific(&table, &Version::parse("0.9.1").unwrap()).unwrap();
        let Some(ModuleEntry::Module(linalg)) = resolved.get("linalg") else {
            panic!("linalg missing");
        };
        assert!(Arc::ptr_eq(bound(linalg, "matmul").unwrap(), &new));
    }
}
