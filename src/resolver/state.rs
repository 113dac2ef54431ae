// src/resolver/state.rs

//! Hypothetical selection explored by the search

use crate::packages::Dependency;
use crate::pool::{PackageId, Pool};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Why a requirement is being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cause {
    /// A requirement of a newly selected package, or of the job itself
    Requirement,
    /// A provider went away because the job removes it
    JobRemoval,
    /// A provider went away because of a conflict or obsolete
    ForcedRemoval,
    /// A provider was replaced by another version
    Replacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateMode {
    /// Newest version that works, or keep
    Newest,
    /// Preferred candidate (may downgrade), obsoletes first, or keep
    Sync,
}

/// A piece of work the search still has to do
#[derive(Debug, Clone)]
pub(crate) enum Goal {
    /// `dep` must be provided by a present package while `by` is present
    Require {
        dep: Dependency,
        by: Option<PackageId>,
        cause: Cause,
        /// Depth of the choice that created this goal
        level: usize,
    },
    /// An installed package should be brought up to date
    Update { installed: PackageId, mode: UpdateMode },
}

/// One way to fulfil a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Alternative {
    Select(PackageId),
    Erase(PackageId),
    Keep,
}

/// How one package was fixed on the current path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Decision {
    pub selected: bool,
    /// Depth of the choice point whose alternative made the decision; 0 for
    /// decisions implied by the job itself
    pub level: usize,
}

/// Decisions made on the current search path
///
/// `decided` holds every variable fixed so far: selected packages, and
/// excluded or removed ones. A decided variable is never decided again on
/// the same path.
#[derive(Debug, Clone, Default)]
pub(crate) struct State {
    pub selected: BTreeSet<PackageId>,
    pub removed: BTreeSet<PackageId>,
    pub decided: BTreeMap<PackageId, Decision>,
    /// Depth of the choice point this state was produced by
    pub level: usize,
    /// installed package -> the package replacing it
    pub replaced: BTreeMap<PackageId, PackageId>,
    pub goals: VecDeque<Goal>,
}

impl State {
    pub fn is_present(&self, pool: &Pool, id: PackageId) -> bool {
        if pool.get(id).is_installed() {
            !self.removed.contains(&id)
        } else {
            self.selected.contains(&id)
        }
    }

    /// Installed packages still present, then selected ones
    pub fn present(&self, pool: &Pool) -> Vec<PackageId> {
        pool.installed()
            .iter()
            .copied()
            .filter(|id| !self.removed.contains(id))
            .chain(self.selected.iter().copied())
            .collect()
    }

    /// Whether some present package satisfies `dep`
    pub fn is_satisfied(&self, pool: &Pool, dep: &Dependency) -> bool {
        pool.capability_providers(&dep.name)
            .iter()
            .any(|&id| self.is_present(pool, id) && pool.get(id).provides_dependency(dep))
    }

    /// Fix `id` at the current depth; the first decision on a path stands
    pub fn decide(&mut self, id: PackageId, selected: bool) {
        let level = self.level;
        self.decided
            .entry(id)
            .or_insert(Decision { selected, level });
    }

    pub fn is_excluded(&self, id: PackageId) -> bool {
        self.decided.get(&id).is_some_and(|d| !d.selected)
    }

    /// Depth at which `id` was decided, when a choice made it
    pub fn level_of(&self, id: PackageId) -> Option<usize> {
        self.decided
            .get(&id)
            .map(|d| d.level)
            .filter(|&level| level > 0)
    }
}
