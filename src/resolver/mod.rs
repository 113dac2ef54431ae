// src/resolver/mod.rs

//! Dependency resolution
//!
//! Turns a [`Job`] into a [`Solution`]: the set of packages to install and to
//! erase so that every present package has its requirements met and no two
//! present packages conflict. Resolution is all-or-nothing; on failure the
//! [`Problems`] explain which dependency could not be satisfied, who asked
//! for it and why each candidate was rejected.

mod conflict;
mod job;
mod problem;
mod search;
mod solution;
mod state;

pub use conflict::{Clash, clash, conflicts, obsoletes};
pub use job::{Job, SolverOptions};
pub use problem::{Problem, ProblemKind, Problems, RejectReason, RejectedCandidate, Requester};
pub use solution::Solution;

use crate::error::{Error, Result};
use crate::pool::Pool;
use search::Search;
use tracing::info;

/// Resolver over one immutable pool
///
/// Holds no state between calls; resolving the same job twice against the
/// same pool gives the same solution.
pub struct Resolver<'a> {
    pool: &'a Pool,
    options: SolverOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self::with_options(pool, SolverOptions::default())
    }

    pub fn with_options(pool: &'a Pool, options: SolverOptions) -> Self {
        Self { pool, options }
    }

    /// Resolve a job
    ///
    /// Unknown targets are a `NotFoundError`. A job that cannot be satisfied
    /// is `Conflict` when a conflict caused it and `Unsatisfiable` otherwise.
    pub fn resolve(&self, job: &Job) -> Result<Solution> {
        info!("Resolving job: {}", job);

        let search = Search::new(self.pool, self.options);
        let state = search.initial_state(job)?;
        match search.run(state) {
            Ok(state) => {
                let solution = Solution::from_state(self.pool, &state);
                info!(
                    "Resolved {}: {} to install, {} to erase",
                    job,
                    solution.installs.len(),
                    solution.erasures.len()
                );
                Ok(solution)
            }
            Err(problems) if problems.has_conflict() => Err(Error::Conflict(problems)),
            Err(problems) => Err(Error::Unsatisfiable(problems)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{Dependency, Package};
    use crate::pool::{PackageId, RepoSnapshot};
    use crate::repository::Repository;
    use crate::version::RpmVersion;
    use std::time::{Duration, Instant};

    fn pkg(name: &str, evr: &str) -> Package {
        Package::new(name, RpmVersion::parse(evr).unwrap(), "x86_64")
    }

    fn requiring(mut pkg: Package, deps: &[&str]) -> Package {
        for dep in deps {
            pkg.requires.push(Dependency::parse(dep).unwrap());
        }
        pkg
    }

    fn conflicting(mut pkg: Package, dep: &str) -> Package {
        pkg.conflicts.push(Dependency::parse(dep).unwrap());
        pkg
    }

    fn repo(name: &str, priority: i32, packages: Vec<Package>) -> RepoSnapshot {
        RepoSnapshot::loaded(
            Repository::new(name, format!("file:///srv/{}", name)).with_priority(priority),
            packages,
        )
    }

    fn names(pool: &Pool, ids: &[PackageId]) -> Vec<String> {
        ids.iter().map(|&id| pool.get(id).nevra.to_string()).collect()
    }

    fn resolve(pool: &Pool, job: Job) -> Result<Solution> {
        Resolver::new(pool).resolve(&job)
    }

    #[test]
    fn test_install_picks_satisfying_version() {
        let pool = Pool::build(
            vec![repo(
                "main",
                10,
                vec![
                    requiring(pkg("foo", "1.0-1"), &["libbar >= 2.0"]),
                    pkg("libbar", "1.0-1"),
                    pkg("libbar", "2.1-1"),
                ],
            )],
            vec![],
        );

        let solution = resolve(&pool, Job::Install("foo".into())).unwrap();
        assert_eq!(
            names(&pool, &solution.installs),
            vec!["foo-1.0-1.x86_64", "libbar-2.1-1.x86_64"]
        );
        assert!(solution.erasures.is_empty());
    }

    #[test]
    fn test_unsatisfiable_reports_candidates() {
        let pool = Pool::build(
            vec![repo(
                "main",
                10,
                vec![
                    requiring(pkg("foo", "1.0-1"), &["libbar >= 2.0"]),
                    pkg("libbar", "1.0-1"),
                ],
            )],
            vec![],
        );

        let err = resolve(&pool, Job::Install("foo".into())).unwrap_err();
        assert!(matches!(err, Error::Unsatisfiable(_)));

        let problems = err.problems().unwrap();
        assert_eq!(problems.len(), 1);
        let problem = problems.iter().next().unwrap();
        assert_eq!(problem.kind, ProblemKind::Unsatisfiable);
        assert_eq!(problem.unsatisfied.to_string(), "libbar>=2.0");
        assert_eq!(
            problem.requested_by,
            Requester::Package(pkg("foo", "1.0-1").nevra)
        );
        assert_eq!(problem.candidates.len(), 1);
        assert_eq!(problem.candidates[0].nevra.to_string(), "libbar-1.0-1.x86_64");
        assert_eq!(problem.candidates[0].reason, RejectReason::VersionTooLow);
    }

    #[test]
    fn test_install_already_installed_is_empty() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![pkg("foo", "1.0-1"), pkg("foo", "1.1-1")])],
            vec![pkg("foo", "1.0-1")],
        );
        assert!(resolve(&pool, Job::Install("foo".into())).unwrap().is_empty());
    }

    #[test]
    fn test_install_versioned_target_upgrades_installed() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![pkg("foo", "2.0-1")])],
            vec![pkg("foo", "1.0-1")],
        );
        let solution = resolve(&pool, Job::Install("foo >= 2".into())).unwrap();
        assert_eq!(names(&pool, &solution.installs), vec!["foo-2.0-1.x86_64"]);
        assert_eq!(names(&pool, &solution.erasures), vec!["foo-1.0-1.x86_64"]);
        assert_eq!(solution.replacements.len(), 1);
    }

    #[test]
    fn test_priority_precedence() {
        let pool = Pool::build(
            vec![
                repo("low", 10, vec![pkg("foo", "1.0-1")]),
                repo("high", 50, vec![pkg("foo", "1.0-1")]),
            ],
            vec![],
        );
        let solution = resolve(&pool, Job::Install("foo".into())).unwrap();
        assert_eq!(solution.installs.len(), 1);
        assert_eq!(pool.get(solution.installs[0]).repo, "high");
    }

    #[test]
    fn test_priority_beats_version() {
        let pool = Pool::build(
            vec![
                repo("updates", 10, vec![pkg("foo", "2.0-1")]),
                repo("pinned", 50, vec![pkg("foo", "1.0-1")]),
            ],
            vec![],
        );
        let solution = resolve(&pool, Job::Install("foo".into())).unwrap();
        assert_eq!(names(&pool, &solution.installs), vec!["foo-1.0-1.x86_64"]);
    }

    #[test]
    fn test_install_by_capability() {
        let mut nginx = pkg("nginx", "1.24-1");
        nginx.provides.push(crate::packages::Capability::new("webserver"));
        let pool = Pool::build(vec![repo("main", 10, vec![nginx])], vec![]);

        let solution = resolve(&pool, Job::Install("webserver".into())).unwrap();
        assert_eq!(names(&pool, &solution.installs), vec!["nginx-1.24-1.x86_64"]);
    }

    #[test]
    fn test_conflict_symmetry() {
        for (a, b) in [
            (conflicting(pkg("a", "1-1"), "b"), pkg("b", "1-1")),
            (pkg("a", "1-1"), conflicting(pkg("b", "1-1"), "a")),
        ] {
            let pool = Pool::build(
                vec![repo("main", 10, vec![requiring(pkg("x", "1-1"), &["a", "b"]), a, b])],
                vec![],
            );
            let err = resolve(&pool, Job::Install("x".into())).unwrap_err();
            assert!(matches!(err, Error::Conflict(_)), "unexpected: {}", err);
        }
    }

    #[test]
    fn test_conflict_removes_unneeded_installed_package() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![conflicting(pkg("a", "1-1"), "b")])],
            vec![pkg("b", "1-1")],
        );
        let solution = resolve(&pool, Job::Install("a".into())).unwrap();
        assert_eq!(names(&pool, &solution.installs), vec!["a-1-1.x86_64"]);
        assert_eq!(names(&pool, &solution.erasures), vec!["b-1-1.x86_64"]);
        assert!(solution.replacements.is_empty());
    }

    #[test]
    fn test_conflict_with_required_installed_package_fails() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![conflicting(pkg("a", "1-1"), "b")])],
            vec![pkg("b", "1-1"), requiring(pkg("c", "1-1"), &["b"])],
        );
        let err = resolve(&pool, Job::Install("a".into())).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_backtracks_to_older_candidate() {
        let pool = Pool::build(
            vec![repo(
                "main",
                10,
                vec![
                    requiring(pkg("app", "1-1"), &["libx"]),
                    requiring(pkg("libx", "2.0-1"), &["libmissing"]),
                    pkg("libx", "1.0-1"),
                ],
            )],
            vec![],
        );
        let solution = resolve(&pool, Job::Install("app".into())).unwrap();
        assert_eq!(
            names(&pool, &solution.installs),
            vec!["app-1-1.x86_64", "libx-1.0-1.x86_64"]
        );
    }

    /// `app` requiring lib00..libNN, each available as 1-1 and 2-1
    fn wide_universe(width: usize, extra_requires: &[&str]) -> Vec<Package> {
        let mut requires: Vec<String> = (0..width).map(|i| format!("lib{:02}", i)).collect();
        requires.extend(extra_requires.iter().map(|r| r.to_string()));
        let requires: Vec<&str> = requires.iter().map(String::as_str).collect();

        let mut packages = vec![requiring(pkg("app", "1-1"), &requires)];
        for i in 0..width {
            packages.push(pkg(&format!("lib{:02}", i), "1-1"));
            packages.push(pkg(&format!("lib{:02}", i), "2-1"));
        }
        packages
    }

    #[test]
    fn test_missing_dependency_fails_fast_among_many_choices() {
        let pool = Pool::build(vec![repo("main", 10, wide_universe(32, &["libmissing"]))], vec![]);

        let started = Instant::now();
        let err = resolve(&pool, Job::Install("app".into())).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());

        let problem = err.problems().unwrap().iter().next().unwrap().clone();
        assert_eq!(problem.unsatisfied.name, "libmissing");
        assert_eq!(problem.requested_by, Requester::Package(pkg("app", "1-1").nevra));
    }

    #[test]
    fn test_upgrade_with_one_broken_update_stays_fast() {
        let width = 32;
        let mut available = vec![requiring(pkg("broken", "2-1"), &["libmissing"])];
        let mut installed = vec![pkg("broken", "1-1")];
        for i in 0..width {
            available.push(pkg(&format!("lib{:02}", i), "2-1"));
            installed.push(pkg(&format!("lib{:02}", i), "1-1"));
        }
        let pool = Pool::build(vec![repo("updates", 10, available)], installed);

        let started = Instant::now();
        let solution = resolve(&pool, Job::Upgrade(None)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());

        assert_eq!(solution.installs.len(), width);
        assert_eq!(solution.replacements.len(), width);
        assert!(
            solution
                .installs
                .iter()
                .all(|&id| pool.get(id).name() != "broken")
        );
    }

    #[test]
    fn test_backjump_revisits_conflicting_choice() {
        // y only works with the older x; the choices in between are unrelated
        let mut packages = wide_universe(6, &["x", "y"]);
        packages.push(pkg("x", "1-1"));
        packages.push(pkg("x", "2-1"));
        packages.push(conflicting(pkg("y", "1-1"), "x >= 2"));
        let pool = Pool::build(vec![repo("main", 10, packages)], vec![]);

        let solution = resolve(&pool, Job::Install("app".into())).unwrap();
        let installed = names(&pool, &solution.installs);
        assert!(installed.contains(&"x-1-1.x86_64".to_string()), "{:?}", installed);
        assert!(installed.contains(&"y-1-1.x86_64".to_string()));
        assert!(installed.contains(&"lib00-2-1.x86_64".to_string()));
        assert_eq!(installed.len(), 9);
    }

    #[test]
    fn test_requirement_cycle_terminates() {
        let pool = Pool::build(
            vec![repo(
                "main",
                10,
                vec![requiring(pkg("a", "1-1"), &["b"]), requiring(pkg("b", "1-1"), &["a"])],
            )],
            vec![],
        );
        let solution = resolve(&pool, Job::Install("a".into())).unwrap();
        assert_eq!(solution.installs.len(), 2);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let pool = Pool::build(
            vec![
                repo("one", 10, vec![requiring(pkg("foo", "1-1"), &["libbar"]), pkg("libbar", "1-1")]),
                repo("two", 10, vec![pkg("libbar", "1-1"), pkg("libbar", "2-1")]),
            ],
            vec![],
        );
        let first = resolve(&pool, Job::Install("foo".into())).unwrap();
        let second = resolve(&pool, Job::Install("foo".into())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_remove_blocked_by_installed_requirer() {
        let pool = Pool::build(
            vec![],
            vec![requiring(pkg("foo", "1-1"), &["bar"]), pkg("bar", "1-1")],
        );

        let err = resolve(&pool, Job::Remove("bar".into())).unwrap_err();
        let problem = err.problems().unwrap().iter().next().unwrap().clone();
        assert_eq!(problem.kind, ProblemKind::Blocked);
        assert_eq!(problem.requested_by, Requester::Package(pkg("foo", "1-1").nevra));
    }

    #[test]
    fn test_remove_blocked_even_if_repository_has_it() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![pkg("bar", "1-1")])],
            vec![requiring(pkg("foo", "1-1"), &["bar"]), pkg("bar", "1-1")],
        );
        let err = resolve(&pool, Job::Remove("bar".into())).unwrap_err();
        let problem = err.problems().unwrap().iter().next().unwrap().clone();
        assert_eq!(problem.kind, ProblemKind::Blocked);
        assert_eq!(problem.candidates[0].reason, RejectReason::Excluded);
    }

    #[test]
    fn test_remove_cascade() {
        let pool = Pool::build(
            vec![],
            vec![
                requiring(pkg("app", "1-1"), &["foo"]),
                requiring(pkg("foo", "1-1"), &["bar"]),
                pkg("bar", "1-1"),
                pkg("unrelated", "1-1"),
            ],
        );
        let options = SolverOptions {
            cascade_removals: true,
        };
        let solution = Resolver::with_options(&pool, options)
            .resolve(&Job::Remove("bar".into()))
            .unwrap();
        assert_eq!(
            names(&pool, &solution.erasures),
            vec!["app-1-1.x86_64", "bar-1-1.x86_64", "foo-1-1.x86_64"]
        );
        assert!(solution.installs.is_empty());
    }

    #[test]
    fn test_remove_leaf() {
        let pool = Pool::build(vec![], vec![pkg("bar", "1-1"), pkg("foo", "1-1")]);
        let solution = resolve(&pool, Job::Remove("bar".into())).unwrap();
        assert_eq!(names(&pool, &solution.erasures), vec!["bar-1-1.x86_64"]);
    }

    #[test]
    fn test_unknown_targets() {
        let pool = Pool::build(vec![repo("main", 10, vec![pkg("foo", "1-1")])], vec![]);
        assert!(matches!(resolve(&pool, Job::Install("ghost".into())), Err(Error::NotFoundError(_))));
        assert!(matches!(resolve(&pool, Job::Remove("foo".into())), Err(Error::NotFoundError(_))));
        assert!(matches!(
            resolve(&pool, Job::Upgrade(Some("foo".into()))),
            Err(Error::NotFoundError(_))
        ));
    }

    #[test]
    fn test_upgrade_to_newest() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![pkg("foo", "1.0-1"), pkg("foo", "2.0-1"), pkg("foo", "1.5-1")])],
            vec![pkg("foo", "1.0-1")],
        );
        let solution = resolve(&pool, Job::Upgrade(None)).unwrap();
        assert_eq!(names(&pool, &solution.installs), vec!["foo-2.0-1.x86_64"]);
        let (old, new) = solution.replacements[0];
        assert!(pool.get(old).is_installed());
        assert_eq!(pool.get(new).nevra.to_string(), "foo-2.0-1.x86_64");
    }

    #[test]
    fn test_upgrade_keeps_when_newer_is_broken() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![requiring(pkg("foo", "2.0-1"), &["libnew"])])],
            vec![pkg("foo", "1.0-1")],
        );
        assert!(resolve(&pool, Job::Upgrade(Some("foo".into()))).unwrap().is_empty());
    }

    #[test]
    fn test_upgrade_pulls_in_newer_dependency() {
        let pool = Pool::build(
            vec![repo(
                "main",
                10,
                vec![requiring(pkg("app", "2-1"), &["libx >= 2"]), pkg("libx", "2-1")],
            )],
            vec![requiring(pkg("app", "1-1"), &["libx"]), pkg("libx", "1-1")],
        );
        let solution = resolve(&pool, Job::Upgrade(Some("app".into()))).unwrap();
        assert_eq!(names(&pool, &solution.installs), vec!["app-2-1.x86_64", "libx-2-1.x86_64"]);
        assert_eq!(solution.replacements.len(), 2);
    }

    #[test]
    fn test_upgrade_never_downgrades() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![pkg("foo", "1.0-1")])],
            vec![pkg("foo", "2.0-1")],
        );
        assert!(resolve(&pool, Job::Upgrade(None)).unwrap().is_empty());
    }

    #[test]
    fn test_dist_upgrade_downgrades_to_preferred() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![pkg("foo", "1.0-1")])],
            vec![pkg("foo", "2.0-1")],
        );
        let solution = resolve(&pool, Job::DistUpgrade(None)).unwrap();
        assert_eq!(names(&pool, &solution.installs), vec!["foo-1.0-1.x86_64"]);
        assert_eq!(names(&pool, &solution.erasures), vec!["foo-2.0-1.x86_64"]);
    }

    #[test]
    fn test_dist_upgrade_applies_obsoletes() {
        let mut replacement = pkg("new-tools", "2.0-1");
        replacement.obsoletes.push(Dependency::parse("old-tools < 2").unwrap());
        let pool = Pool::build(
            vec![repo("main", 10, vec![replacement])],
            vec![pkg("old-tools", "1.0-1")],
        );

        let solution = resolve(&pool, Job::DistUpgrade(None)).unwrap();
        assert_eq!(names(&pool, &solution.installs), vec!["new-tools-2.0-1.x86_64"]);
        assert_eq!(names(&pool, &solution.erasures), vec!["old-tools-1.0-1.x86_64"]);
        assert_eq!(solution.replacement_for(solution.erasures[0]), Some(solution.installs[0]));
    }

    #[test]
    fn test_dist_upgrade_up_to_date_is_empty() {
        let pool = Pool::build(
            vec![repo("main", 10, vec![pkg("foo", "1.0-1")])],
            vec![pkg("foo", "1.0-1"), pkg("local-only", "1-1")],
        );
        assert!(resolve(&pool, Job::DistUpgrade(None)).unwrap().is_empty());
    }
}
