// src/pool/mod.rs

//! The package pool
//!
//! All package records known for one resolution session: every record from
//! every enabled repository plus the installed system. Records are stored in a
//! flat arena and referred to by [`PackageId`]; indices by name and by provided
//! capability point into it. A pool is never modified after [`Pool::build`].

use crate::packages::{Dependency, INSTALLED_REPO, Package};
use crate::repository::Repository;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Index of a package record inside a [`Pool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(usize);

impl PackageId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Metadata of one repository as delivered by the metadata layer
#[derive(Debug, Clone)]
pub enum Metadata {
    Loaded(Vec<Package>),
    /// The metadata is missing or corrupt; the reason is reported as a warning
    Unavailable(String),
}

/// One configured repository together with its metadata
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    pub repository: Repository,
    pub metadata: Metadata,
}

impl RepoSnapshot {
    pub fn loaded(repository: Repository, packages: Vec<Package>) -> Self {
        Self {
            repository,
            metadata: Metadata::Loaded(packages),
        }
    }

    pub fn unavailable(repository: Repository, reason: impl Into<String>) -> Self {
        Self {
            repository,
            metadata: Metadata::Unavailable(reason.into()),
        }
    }
}

/// Preference between two candidates for the same dependency
///
/// Higher repository priority first, then higher version, then repository
/// name, then architecture. This is a total order on distinct records.
pub fn preference(a: &Package, b: &Package) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.evr().cmp(a.evr()))
        .then_with(|| a.repo.cmp(&b.repo))
        .then_with(|| a.arch().cmp(b.arch()))
        .then_with(|| a.nevra.key().cmp(&b.nevra.key()))
}

/// The immutable package universe of one session
#[derive(Debug, Default)]
pub struct Pool {
    packages: Vec<Package>,
    by_name: BTreeMap<String, Vec<PackageId>>,
    by_capability: BTreeMap<String, Vec<PackageId>>,
    /// Obsoleted name -> repository records obsoleting it
    by_obsoleted: BTreeMap<String, Vec<PackageId>>,
    installed: Vec<PackageId>,
    warnings: Vec<String>,
}

impl Pool {
    /// Build a pool from repository snapshots and the installed set
    ///
    /// Disabled repositories contribute nothing. Unavailable repositories are
    /// skipped with a warning, as are individual malformed records. The result
    /// does not depend on the order of `snapshots` or `installed`.
    pub fn build(snapshots: Vec<RepoSnapshot>, installed: Vec<Package>) -> Self {
        let mut warnings = Vec::new();
        let mut records = Vec::new();

        for snapshot in snapshots {
            let repo = snapshot.repository;
            if !repo.enabled {
                debug!("Skipping disabled repository {}", repo.name);
                continue;
            }

            let packages = match snapshot.metadata {
                Metadata::Loaded(packages) => packages,
                Metadata::Unavailable(reason) => {
                    warn!("Excluding repository {}: {}", repo.name, reason);
                    warnings.push(format!("repository '{}' excluded: {}", repo.name, reason));
                    continue;
                }
            };

            let mut seen = HashSet::new();
            let mut count = 0usize;
            for mut pkg in packages {
                if pkg.name().is_empty() {
                    warnings.push(format!("repository '{}': skipped record without a name", repo.name));
                    continue;
                }
                if !seen.insert(pkg.nevra.key()) {
                    warnings.push(format!(
                        "repository '{}': duplicate record {} skipped",
                        repo.name, pkg.nevra
                    ));
                    continue;
                }
                pkg.repo = repo.name.clone();
                pkg.priority = repo.priority;
                pkg.gpgcheck = repo.gpgcheck;
                records.push(pkg);
                count += 1;
            }
            debug!("Repository {} contributed {} packages", repo.name, count);
        }

        let mut seen_installed = HashSet::new();
        for mut pkg in installed {
            if !seen_installed.insert(pkg.nevra.key()) {
                continue;
            }
            pkg.repo = INSTALLED_REPO.to_string();
            pkg.gpgcheck = false;
            records.push(pkg);
        }

        records.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| preference(a, b)));

        let mut pool = Pool {
            warnings,
            ..Default::default()
        };
        for (index, pkg) in records.into_iter().enumerate() {
            let id = PackageId(index);
            pool.by_name.entry(pkg.name().to_string()).or_default().push(id);

            let names: BTreeSet<&str> = std::iter::once(pkg.name())
                .chain(pkg.provides.iter().map(|cap| cap.name.as_str()))
                .collect();
            for name in names {
                pool.by_capability.entry(name.to_string()).or_default().push(id);
            }

            if pkg.is_installed() {
                pool.installed.push(id);
            } else {
                let obsoleted: BTreeSet<&str> = pkg.obsoletes.iter().map(|d| d.name.as_str()).collect();
                for name in obsoleted {
                    pool.by_obsoleted.entry(name.to_string()).or_default().push(id);
                }
            }
            pool.packages.push(pkg);
        }

        info!(
            "Pool built: {} packages ({} installed)",
            pool.packages.len(),
            pool.installed.len()
        );
        for warning in &pool.warnings {
            debug!("Pool warning: {}", warning);
        }
        pool
    }

    pub fn get(&self, id: PackageId) -> &Package {
        &self.packages[id.0]
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// All ids in iteration order (name, then preference)
    pub fn ids(&self) -> impl Iterator<Item = PackageId> {
        (0..self.packages.len()).map(PackageId)
    }

    /// Every record with this exact package name, installed ones included
    pub fn by_name(&self, name: &str) -> &[PackageId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every record advertising a capability with this name, regardless of version
    pub fn capability_providers(&self, name: &str) -> &[PackageId] {
        self.by_capability.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Repository records declaring an obsolete on this capability name
    pub fn obsoleters(&self, name: &str) -> &[PackageId] {
        self.by_obsoleted.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every record (installed or not) that satisfies `dep`
    pub fn providers(&self, dep: &Dependency) -> Vec<PackageId> {
        self.capability_providers(&dep.name)
            .iter()
            .copied()
            .filter(|&id| self.get(id).provides_dependency(dep))
            .collect()
    }

    /// Repository records satisfying `dep`, most preferred first
    pub fn candidates(&self, dep: &Dependency) -> Vec<PackageId> {
        let mut ids: Vec<PackageId> = self
            .providers(dep)
            .into_iter()
            .filter(|&id| !self.get(id).is_installed())
            .collect();
        self.sort_by_preference(&mut ids);
        ids
    }

    pub fn sort_by_preference(&self, ids: &mut [PackageId]) {
        ids.sort_by(|&a, &b| preference(self.get(a), self.get(b)));
    }

    /// Installed records, sorted by name
    pub fn installed(&self) -> &[PackageId] {
        &self.installed
    }

    /// Installed records with this package name
    pub fn installed_named(&self, name: &str) -> Vec<PackageId> {
        self.by_name(name)
            .iter()
            .copied()
            .filter(|&id| self.get(id).is_installed())
            .collect()
    }

    /// Problems met while building the pool
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Search repository records
    ///
    /// A pattern containing `*`, `?` or `[` is a glob matched against package
    /// names; anything else is a case-insensitive substring of name or summary.
    pub fn search(&self, pattern: &str) -> Vec<PackageId> {
        let is_glob = pattern.contains(['*', '?', '[']);
        let glob = if is_glob {
            match glob::Pattern::new(pattern) {
                Ok(glob) => Some(glob),
                Err(e) => {
                    warn!("Invalid search pattern '{}': {}, using substring match", pattern, e);
                    None
                }
            }
        } else {
            None
        };
        let needle = pattern.to_lowercase();

        self.ids()
            .filter(|&id| {
                let pkg = self.get(id);
                if pkg.is_installed() {
                    return false;
                }
                match &glob {
                    Some(glob) => glob.matches(pkg.name()),
                    None => {
                        pkg.name().to_lowercase().contains(&needle)
                            || pkg.summary.to_lowercase().contains(&needle)
                    }
                }
            })
            .collect()
    }
}
