// src/resolver/job.rs

//! User requests submitted to the resolver

use std::fmt;

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Make a package (or a dependency such as `foo >= 2`) present
    Install(String),
    /// Make every installed package of this name absent
    Remove(String),
    /// Replace installed packages with their newest available version
    Upgrade(Option<String>),
    /// Synchronize installed packages with the preferred repository versions,
    /// applying obsoletes and allowing downgrades
    DistUpgrade(Option<String>),
}

impl Job {
    pub fn action(&self) -> &'static str {
        match self {
            Job::Install(_) => "install",
            Job::Remove(_) => "remove",
            Job::Upgrade(_) => "upgrade",
            Job::DistUpgrade(_) => "dist-upgrade",
        }
    }

    /// Whether the job compares installed packages against the newest
    /// repository versions, and so needs fresh metadata
    pub fn refreshes_metadata(&self) -> bool {
        matches!(self, Job::Upgrade(_) | Job::DistUpgrade(_))
    }

    /// The named target; `None` means the whole system
    pub fn target(&self) -> Option<&str> {
        match self {
            Job::Install(target) | Job::Remove(target) => Some(target),
            Job::Upgrade(target) | Job::DistUpgrade(target) => target.as_deref(),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(target) => write!(f, "{} {}", self.action(), target),
            None => write!(f, "{} (all packages)", self.action()),
        }
    }
}

/// Policy switches for a resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverOptions {
    /// Remove installed dependents of a removed package instead of failing
    pub cascade_removals: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_refresh() {
        assert_eq!(Job::Install("foo".to_string()).to_string(), "install foo");
        assert_eq!(Job::Upgrade(None).to_string(), "upgrade (all packages)");

        assert!(Job::Upgrade(None).refreshes_metadata());
        assert!(Job::DistUpgrade(Some("foo".to_string())).refreshes_metadata());
        assert!(!Job::Install("foo".to_string()).refreshes_metadata());
        assert!(!Job::Remove("foo".to_string()).refreshes_metadata());
    }
}
