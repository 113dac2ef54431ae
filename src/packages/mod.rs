// src/packages/mod.rs

//! Package records known to Zenit
//!
//! A [`Package`] is one build of one package from one repository (or from the
//! installed system), identified by its [`Nevra`]. Relations to other packages
//! are expressed through [`Capability`] and [`Dependency`] values.

pub mod relation;
pub mod rpm;
pub mod rpmdb;

pub use relation::{Capability, Dependency, Operator, VersionMismatch};

use crate::version::RpmVersion;
use std::fmt;

/// Pseudo repository name used for installed packages
pub const INSTALLED_REPO: &str = "@System";

/// Name-Epoch-Version-Release-Arch: the full identity of a package build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nevra {
    pub name: String,
    pub evr: RpmVersion,
    pub arch: String,
}

impl Nevra {
    pub fn new(name: impl Into<String>, evr: RpmVersion, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            evr,
            arch: arch.into(),
        }
    }

    /// Stable string key, always carrying the epoch
    ///
    /// Unlike `Display`, two versions that compare equal but are spelled
    /// differently get different keys, which is what an identity needs.
    pub fn key(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name,
            self.evr.epoch,
            self.evr.version,
            self.evr.release.as_deref().unwrap_or(""),
            self.arch
        )
    }
}

impl Nevra {
    /// `name-version-release.arch`, the label `rpm -qa` prints and `rpm -e`
    /// accepts; the epoch is left out
    pub fn rpm_label(&self) -> String {
        match &self.evr.release {
            Some(release) => format!("{}-{}-{}.{}", self.name, self.evr.version, release, self.arch),
            None => format!("{}-{}.{}", self.name, self.evr.version, self.arch),
        }
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.evr, self.arch)
    }
}

/// A package record from a repository or from the installed system
#[derive(Debug, Clone)]
pub struct Package {
    pub nevra: Nevra,
    /// Repository this record came from ([`INSTALLED_REPO`] when installed)
    pub repo: String,
    /// Priority inherited from the repository (higher is preferred)
    pub priority: i32,
    /// Whether the repository requires signature checks
    pub gpgcheck: bool,
    pub provides: Vec<Capability>,
    pub requires: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub obsoletes: Vec<Dependency>,
    /// Artifact URL
    pub location: String,
    pub summary: String,
    /// SHA-256 of the artifact, when the metadata provides one
    pub checksum: Option<String>,
}

impl Package {
    pub fn new(name: impl Into<String>, evr: RpmVersion, arch: impl Into<String>) -> Self {
        Self {
            nevra: Nevra::new(name, evr, arch),
            repo: String::new(),
            priority: 0,
            gpgcheck: false,
            provides: Vec::new(),
            requires: Vec::new(),
            conflicts: Vec::new(),
            obsoletes: Vec::new(),
            location: String::new(),
            summary: String::new(),
            checksum: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.nevra.name
    }

    pub fn evr(&self) -> &RpmVersion {
        &self.nevra.evr
    }

    pub fn arch(&self) -> &str {
        &self.nevra.arch
    }

    pub fn is_installed(&self) -> bool {
        self.repo == INSTALLED_REPO
    }

    /// The implicit capability every package provides: its own name and EVR
    pub fn self_capability(&self) -> Capability {
        Capability::versioned(self.nevra.name.clone(), self.nevra.evr.clone())
    }

    /// All capabilities, the implicit one first
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        std::iter::once(self.self_capability()).chain(self.provides.iter().cloned())
    }

    /// Whether any capability of this package satisfies `dep`
    pub fn provides_dependency(&self, dep: &Dependency) -> bool {
        if dep.name == self.nevra.name && dep.is_satisfied_by(&self.self_capability()) {
            return true;
        }
        self.provides.iter().any(|cap| dep.is_satisfied_by(cap))
    }

    /// Requirements the resolver must enforce
    pub fn hard_requires(&self) -> impl Iterator<Item = &Dependency> {
        self.requires.iter().filter(|dep| !dep.optional)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nevra)
    }
}
