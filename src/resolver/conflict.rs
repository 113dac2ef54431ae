// src/resolver/conflict.rs

//! Conflict and obsolete detection between two packages

use crate::packages::{Dependency, Package};

/// How an incoming package clashes with one that is already present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clash {
    /// The incoming package declares a conflict with the other one
    Conflicts,
    /// The other package declares a conflict with the incoming one
    ConflictedBy,
    /// The incoming package obsoletes the other one
    Obsoletes,
    /// The other package obsoletes the incoming one
    ObsoletedBy,
}

fn declares_against(deps: &[Dependency], target: &Package) -> bool {
    deps.iter().any(|dep| target.provides_dependency(dep))
}

/// Whether `incoming` and `present` may not coexist
///
/// A package never clashes with itself.
pub fn clash(incoming: &Package, present: &Package) -> Option<Clash> {
    if incoming.nevra.key() == present.nevra.key() {
        return None;
    }
    if declares_against(&incoming.conflicts, present) {
        Some(Clash::Conflicts)
    } else if declares_against(&present.conflicts, incoming) {
        Some(Clash::ConflictedBy)
    } else if declares_against(&incoming.obsoletes, present) {
        Some(Clash::Obsoletes)
    } else if declares_against(&present.obsoletes, incoming) {
        Some(Clash::ObsoletedBy)
    } else {
        None
    }
}

/// Symmetric form of [`clash`]
pub fn conflicts(a: &Package, b: &Package) -> bool {
    clash(a, b).is_some()
}

/// Whether `incoming` obsoletes anything `installed` provides
pub fn obsoletes(incoming: &Package, installed: &Package) -> bool {
    incoming.nevra.key() != installed.nevra.key() && declares_against(&incoming.obsoletes, installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::Capability;
    use crate::version::RpmVersion;

    fn pkg(name: &str, evr: &str) -> Package {
        Package::new(name, RpmVersion::parse(evr).unwrap(), "x86_64")
    }

    #[test]
    fn test_conflict_is_symmetric() {
        let mut a = pkg("a", "1.0-1");
        a.conflicts.push(Dependency::new("b"));
        let b = pkg("b", "1.0-1");

        assert_eq!(clash(&a, &b), Some(Clash::Conflicts));
        assert_eq!(clash(&b, &a), Some(Clash::ConflictedBy));
        assert!(conflicts(&a, &b) && conflicts(&b, &a));
    }

    #[test]
    fn test_versioned_conflict() {
        let mut a = pkg("a", "1.0-1");
        a.conflicts.push(Dependency::parse("b < 2.0").unwrap());
        assert!(conflicts(&a, &pkg("b", "1.5-1")));
        assert!(!conflicts(&a, &pkg("b", "2.0-1")));
    }

    #[test]
    fn test_obsoletes_match_provided_capabilities() {
        let mut new = pkg("new-tools", "2.0-1");
        new.obsoletes.push(Dependency::new("legacy-tools"));
        let mut old = pkg("old-tools", "1.0-1");
        old.provides.push(Capability::new("legacy-tools"));

        assert!(obsoletes(&new, &old));
        assert_eq!(clash(&new, &old), Some(Clash::Obsoletes));
        assert_eq!(clash(&old, &new), Some(Clash::ObsoletedBy));
    }

    #[test]
    fn test_self_conflict_ignored() {
        let mut a = pkg("a", "1.0-1");
        a.conflicts.push(Dependency::new("a"));
        assert_eq!(clash(&a, &a.clone()), None);
    }
}
