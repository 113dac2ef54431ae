// src/resolver/search.rs

//! Backtracking search over package selections
//!
//! Goals are processed in FIFO order. A goal with several ways to be met
//! becomes a choice point holding a snapshot of the state before the choice.
//! Every decision remembers the depth of the choice point that made it, so a
//! goal that cannot be met knows which earlier choices its failure depends
//! on. The search jumps straight back to the deepest of those and tries its
//! next alternative; choice points in between are discarded, since no
//! alternative there changes the outcome.
//!
//! A requirement that nothing in the pool provides fails on every path, so
//! its requester is marked dead and never selected again.

use super::conflict::{self, Clash};
use super::job::{Job, SolverOptions};
use super::problem::{Problem, ProblemKind, Problems, RejectReason, RejectedCandidate, Requester};
use super::state::{Alternative, Cause, Goal, State, UpdateMode};
use crate::error::{Error, Result};
use crate::packages::{Dependency, Package};
use crate::pool::{PackageId, Pool, preference};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Whether two builds of the same name occupy the same install slot
pub(crate) fn same_slot(a: &Package, b: &Package) -> bool {
    a.name() == b.name() && (a.arch() == b.arch() || a.arch() == "noarch" || b.arch() == "noarch")
}

fn version_reason(pkg: &Package, dep: &Dependency) -> RejectReason {
    pkg.capabilities()
        .filter(|cap| cap.name == dep.name)
        .find_map(|cap| dep.mismatch(&cap))
        .map(RejectReason::from)
        .unwrap_or(RejectReason::Excluded)
}

struct ChoicePoint {
    /// State before any alternative was applied
    base: State,
    goal: Goal,
    alternatives: Vec<Alternative>,
    next: usize,
    rejected: Vec<RejectedCandidate>,
    /// Depths of the earlier choices this point's failures depend on
    conflicts: BTreeSet<usize>,
}

/// A refused alternative and the package whose decision refused it
struct Refusal {
    reason: RejectReason,
    blame: Option<PackageId>,
}

impl Refusal {
    fn new(reason: RejectReason, blame: Option<PackageId>) -> Self {
        Self { reason, blame }
    }
}

enum Expansion {
    Satisfied,
    Choose {
        alternatives: Vec<Alternative>,
        rejected: Vec<RejectedCandidate>,
        conflicts: BTreeSet<usize>,
    },
}

pub(crate) struct Search<'a> {
    pool: &'a Pool,
    options: SolverOptions,
    problems: Problems,
    /// Outermost failure, reported when no direct cause was recorded
    fallback: Option<Problem>,
    /// Packages with a requirement nothing in the pool provides
    dead: BTreeSet<PackageId>,
    choices: usize,
}

impl<'a> Search<'a> {
    pub fn new(pool: &'a Pool, options: SolverOptions) -> Self {
        Self {
            pool,
            options,
            problems: Problems::default(),
            fallback: None,
            dead: BTreeSet::new(),
            choices: 0,
        }
    }

    /// Turn a job into the starting state of the search
    pub fn initial_state(&self, job: &Job) -> Result<State> {
        let mut state = State::default();
        match job {
            Job::Install(target) => {
                let dep = Dependency::parse(target)?;
                if self.pool.capability_providers(&dep.name).is_empty() {
                    return Err(Error::NotFoundError(format!(
                        "No package provides '{}'",
                        dep.name
                    )));
                }
                state.goals.push_back(Goal::Require {
                    dep,
                    by: None,
                    cause: Cause::Requirement,
                    level: 0,
                });
            }
            Job::Remove(name) => {
                let targets = self.pool.installed_named(name);
                if targets.is_empty() {
                    return Err(Error::NotFoundError(format!(
                        "Package '{}' is not installed",
                        name
                    )));
                }
                // Nothing of that name may come back on any path
                for &id in self.pool.by_name(name) {
                    state.decide(id, false);
                }
                for id in targets {
                    self.remove(&mut state, id, Cause::JobRemoval, None);
                }
            }
            Job::Upgrade(target) => {
                self.push_updates(&mut state, target.as_deref(), UpdateMode::Newest)?
            }
            Job::DistUpgrade(target) => {
                self.push_updates(&mut state, target.as_deref(), UpdateMode::Sync)?
            }
        }
        Ok(state)
    }

    fn push_updates(&self, state: &mut State, target: Option<&str>, mode: UpdateMode) -> Result<()> {
        let installed = match target {
            Some(name) => {
                let ids = self.pool.installed_named(name);
                if ids.is_empty() {
                    return Err(Error::NotFoundError(format!(
                        "Package '{}' is not installed",
                        name
                    )));
                }
                ids
            }
            None => self.pool.installed().to_vec(),
        };

        for installed in installed {
            state.goals.push_back(Goal::Update { installed, mode });
        }
        Ok(())
    }

    /// Run the search to completion
    pub fn run(mut self, mut state: State) -> std::result::Result<State, Problems> {
        let mut stack: Vec<ChoicePoint> = Vec::new();

        loop {
            let Some(goal) = state.goals.pop_front() else {
                debug!("Resolution succeeded after {} choices", self.choices);
                return Ok(state);
            };

            match self.expand(&state, &goal) {
                Expansion::Satisfied => continue,
                Expansion::Choose {
                    alternatives,
                    rejected,
                    conflicts,
                } => stack.push(ChoicePoint {
                    base: state,
                    goal,
                    alternatives,
                    next: 0,
                    rejected,
                    conflicts,
                }),
            }

            match self.advance(&mut stack) {
                Some(next) => state = next,
                None => {
                    debug!("Resolution failed after {} choices", self.choices);
                    if self.problems.is_empty() {
                        if let Some(problem) = self.fallback.take() {
                            self.problems.push(problem);
                        }
                    }
                    return Err(self.problems);
                }
            }
        }
    }

    /// Apply the next viable alternative, backjumping as needed
    fn advance(&mut self, stack: &mut Vec<ChoicePoint>) -> Option<State> {
        loop {
            let depth = stack.len();
            let point = stack.last_mut()?;
            while point.next < point.alternatives.len() {
                let alternative = point.alternatives[point.next];
                point.next += 1;
                self.choices += 1;

                let mut state = point.base.clone();
                state.level = depth;
                match self.apply(&mut state, alternative) {
                    Ok(()) => return Some(state),
                    Err(refusal) => {
                        trace!("Rejected {:?}: {}", alternative, refusal.reason);
                        if let Some(level) = refusal.blame.and_then(|id| point.base.level_of(id)) {
                            point.conflicts.insert(level);
                        }
                        if let Alternative::Select(id) = alternative {
                            point.rejected.push(self.rejection(id, refusal.reason));
                        }
                    }
                }
            }

            let exhausted = stack.pop()?;
            self.record(&exhausted);

            // Nothing chosen so far can change the outcome
            let Some(&target) = exhausted.conflicts.iter().next_back() else {
                stack.clear();
                return None;
            };
            if target + 1 < depth {
                trace!("Backjumping from depth {} to {}", depth, target);
            }
            stack.truncate(target);

            // The target's active alternative led here
            if let Some(parent) = stack.last_mut() {
                parent
                    .conflicts
                    .extend(exhausted.conflicts.range(..target).copied());
                if let Some(&Alternative::Select(id)) = parent.alternatives.get(parent.next - 1) {
                    parent
                        .rejected
                        .push(self.rejection(id, RejectReason::DependencyFailed));
                }
            }
        }
    }

    fn record(&mut self, point: &ChoicePoint) {
        let Goal::Require { dep, by, cause, .. } = &point.goal else {
            return;
        };

        let requested_by = match by {
            Some(id) => Requester::Package(self.pool.get(*id).nevra.clone()),
            None => Requester::Job,
        };
        let problem = Problem {
            kind: self.problem_kind(*by, *cause, &point.rejected),
            unsatisfied: dep.clone(),
            requested_by,
            candidates: point.rejected.clone(),
        };

        let direct = point.alternatives.is_empty()
            || point
                .rejected
                .iter()
                .any(|c| c.reason != RejectReason::DependencyFailed);
        if direct {
            self.problems.push(problem);
        } else {
            self.fallback = Some(problem);
        }
    }

    fn problem_kind(&self, by: Option<PackageId>, cause: Cause, rejected: &[RejectedCandidate]) -> ProblemKind {
        let by_installed = by.is_some_and(|id| self.pool.get(id).is_installed());
        if cause == Cause::JobRemoval && by_installed {
            return ProblemKind::Blocked;
        }
        if cause == Cause::ForcedRemoval {
            return ProblemKind::Conflict;
        }

        let any_conflict = rejected.iter().any(|c| c.reason.is_conflict());
        let only_conflicts = rejected.iter().all(|c| {
            c.reason.is_conflict()
                || matches!(c.reason, RejectReason::DependencyFailed | RejectReason::Excluded)
        });
        if any_conflict && only_conflicts {
            ProblemKind::Conflict
        } else {
            ProblemKind::Unsatisfiable
        }
    }

    fn rejection(&self, id: PackageId, reason: RejectReason) -> RejectedCandidate {
        let pkg = self.pool.get(id);
        RejectedCandidate {
            nevra: pkg.nevra.clone(),
            repo: pkg.repo.clone(),
            reason,
        }
    }

    fn expand(&mut self, state: &State, goal: &Goal) -> Expansion {
        match goal {
            Goal::Require {
                dep,
                by,
                cause,
                level,
            } => self.expand_require(state, dep, *by, *cause, *level),
            Goal::Update { installed, mode } => self.expand_update(state, *installed, *mode),
        }
    }

    fn expand_require(
        &mut self,
        state: &State,
        dep: &Dependency,
        by: Option<PackageId>,
        cause: Cause,
        level: usize,
    ) -> Expansion {
        let pool = self.pool;
        if by.is_some_and(|id| !state.is_present(pool, id)) {
            return Expansion::Satisfied;
        }
        if state.is_satisfied(pool, dep) {
            return Expansion::Satisfied;
        }

        let mut conflicts = BTreeSet::new();
        if level > 0 {
            conflicts.insert(level);
        }
        // An installed requester stays only while no choice removes it, so
        // every choice so far may matter
        if by.is_some_and(|id| pool.get(id).is_installed()) {
            conflicts.extend(1..=state.level);
        }

        let mut candidates = Vec::new();
        let mut rejected = Vec::new();
        let mut provided = false;
        for &id in pool.capability_providers(&dep.name) {
            let pkg = pool.get(id);
            let provides = pkg.provides_dependency(dep);
            provided |= provides;
            if pkg.is_installed() {
                // Present installed providers satisfy the goal, so this one was removed
                if provides {
                    conflicts.extend(state.level_of(id));
                }
                continue;
            }
            if !provides {
                rejected.push(self.rejection(id, version_reason(pkg, dep)));
            } else if state.is_excluded(id) {
                conflicts.extend(state.level_of(id));
                rejected.push(self.rejection(id, RejectReason::Excluded));
            } else {
                candidates.push(id);
            }
        }

        if !provided {
            if let Some(id) = by.filter(|&id| !pool.get(id).is_installed()) {
                debug!("{} can never be installed: nothing provides {}", pool.get(id).nevra, dep);
                self.dead.insert(id);
            }
        }

        // A request by name prefers packages of that name over other providers
        candidates.sort_by(|&a, &b| {
            let (a, b) = (pool.get(a), pool.get(b));
            let by_name = if by.is_none() {
                (b.name() == dep.name).cmp(&(a.name() == dep.name))
            } else {
                std::cmp::Ordering::Equal
            };
            by_name.then_with(|| preference(a, b))
        });

        let mut alternatives: Vec<Alternative> =
            candidates.into_iter().map(Alternative::Select).collect();
        if cause == Cause::JobRemoval && self.options.cascade_removals {
            if let Some(by) = by.filter(|&id| pool.get(id).is_installed()) {
                alternatives.insert(0, Alternative::Erase(by));
            }
        }

        Expansion::Choose {
            alternatives,
            rejected,
            conflicts,
        }
    }

    fn expand_update(&self, state: &State, installed: PackageId, mode: UpdateMode) -> Expansion {
        let pool = self.pool;
        if !state.is_present(pool, installed) {
            return Expansion::Satisfied;
        }

        let current = pool.get(installed);
        let mut same_name: Vec<PackageId> = pool
            .by_name(current.name())
            .iter()
            .copied()
            .filter(|&id| {
                let pkg = pool.get(id);
                !pkg.is_installed() && same_slot(pkg, current)
            })
            .collect();

        let mut alternatives = Vec::new();
        match mode {
            UpdateMode::Newest => {
                same_name.retain(|&id| pool.get(id).evr() > current.evr());
                same_name.sort_by(|&a, &b| {
                    let (a, b) = (pool.get(a), pool.get(b));
                    b.evr().cmp(a.evr()).then_with(|| preference(a, b))
                });
                alternatives.extend(same_name.into_iter().map(Alternative::Select));
            }
            UpdateMode::Sync => {
                alternatives.extend(self.obsoleters_of(current).into_iter().map(Alternative::Select));
                pool.sort_by_preference(&mut same_name);
                for id in same_name {
                    // The installed build is already the preferred one
                    if pool.get(id).nevra.key() == current.nevra.key() {
                        break;
                    }
                    alternatives.push(Alternative::Select(id));
                }
            }
        }

        if alternatives.is_empty() {
            return Expansion::Satisfied;
        }
        alternatives.push(Alternative::Keep);
        Expansion::Choose {
            alternatives,
            rejected: Vec::new(),
            conflicts: BTreeSet::new(),
        }
    }

    /// Repository packages of another name obsoleting `installed`
    fn obsoleters_of(&self, installed: &Package) -> Vec<PackageId> {
        let pool = self.pool;
        let mut ids: Vec<PackageId> = installed
            .capabilities()
            .flat_map(|cap| pool.obsoleters(&cap.name).iter().copied().collect::<Vec<_>>())
            .filter(|&id| {
                let pkg = pool.get(id);
                pkg.name() != installed.name() && conflict::obsoletes(pkg, installed)
            })
            .collect();
        ids.sort();
        ids.dedup();
        pool.sort_by_preference(&mut ids);
        ids
    }

    fn apply(&self, state: &mut State, alternative: Alternative) -> std::result::Result<(), Refusal> {
        match alternative {
            Alternative::Select(id) => self.select(state, id),
            Alternative::Erase(id) => {
                if state.is_present(self.pool, id) {
                    self.remove(state, id, Cause::JobRemoval, None);
                }
                Ok(())
            }
            Alternative::Keep => Ok(()),
        }
    }

    /// Make a repository package present
    ///
    /// Installed packages in the way (same name and slot, conflicts,
    /// obsoletes) are removed; newly selected ones reject the candidate.
    fn select(&self, state: &mut State, id: PackageId) -> std::result::Result<(), Refusal> {
        match state.decided.get(&id) {
            Some(decision) if !decision.selected => {
                return Err(Refusal::new(RejectReason::Excluded, Some(id)));
            }
            Some(_) => return Ok(()),
            None => {}
        }
        if self.dead.contains(&id) {
            return Err(Refusal::new(RejectReason::DependencyFailed, None));
        }

        let pool = self.pool;
        let incoming = pool.get(id);
        let mut evictions = Vec::new();
        for other_id in state.present(pool) {
            let other = pool.get(other_id);
            let replaces_slot = same_slot(incoming, other);
            let clash = if replaces_slot {
                None
            } else {
                conflict::clash(incoming, other)
            };
            if !replaces_slot && clash.is_none() {
                continue;
            }

            if other.is_installed() {
                let replaces = replaces_slot || clash == Some(Clash::Obsoletes);
                evictions.push((other_id, replaces));
                continue;
            }
            let reason = match clash {
                Some(Clash::ObsoletedBy) => RejectReason::Obsoleted(other.nevra.clone()),
                _ => RejectReason::Conflict(other.nevra.clone()),
            };
            return Err(Refusal::new(reason, Some(other_id)));
        }

        trace!("Selecting {}", incoming.nevra);
        state.decide(id, true);
        state.selected.insert(id);

        for (other, replaces) in evictions {
            if replaces {
                self.remove(state, other, Cause::Replacement, Some(id));
            } else {
                self.remove(state, other, Cause::ForcedRemoval, None);
            }
        }

        for dep in incoming.hard_requires() {
            state.goals.push_back(Goal::Require {
                dep: dep.clone(),
                by: Some(id),
                cause: Cause::Requirement,
                level: state.level,
            });
        }
        Ok(())
    }

    /// Make an installed package absent and re-check everything relying on it
    fn remove(&self, state: &mut State, id: PackageId, cause: Cause, replaced_by: Option<PackageId>) {
        state.decide(id, false);
        if !state.removed.insert(id) {
            return;
        }
        if let Some(new) = replaced_by {
            state.replaced.insert(id, new);
        }

        let pool = self.pool;
        let removed = pool.get(id);
        trace!("Removing {}", removed.nevra);
        for other_id in state.present(pool) {
            for dep in pool.get(other_id).hard_requires() {
                if removed.provides_dependency(dep) {
                    state.goals.push_back(Goal::Require {
                        dep: dep.clone(),
                        by: Some(other_id),
                        cause,
                        level: state.level,
                    });
                }
            }
        }
    }
}
