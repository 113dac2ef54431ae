// src/resolver/problem.rs

//! Explanations of failed resolutions

use crate::packages::{Dependency, Nevra, VersionMismatch};
use std::fmt;

/// Who asked for a dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    /// The user's job
    Job,
    /// A package declaring the dependency
    Package(Nevra),
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requester::Job => write!(f, "the request"),
            Requester::Package(nevra) => write!(f, "{}", nevra),
        }
    }
}

/// Why a candidate was not used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    VersionTooLow,
    VersionTooHigh,
    /// Conflicts with a package that must stay
    Conflict(Nevra),
    /// Obsoleted by a package that must stay
    Obsoleted(Nevra),
    /// Already ruled out on this search path
    Excluded,
    /// Selected, but its own requirements could not be satisfied
    DependencyFailed,
    /// Takes part in a cycle of hard requirements
    Cycle,
}

impl From<VersionMismatch> for RejectReason {
    fn from(mismatch: VersionMismatch) -> Self {
        match mismatch {
            VersionMismatch::TooLow => RejectReason::VersionTooLow,
            VersionMismatch::TooHigh => RejectReason::VersionTooHigh,
        }
    }
}

impl RejectReason {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RejectReason::Conflict(_) | RejectReason::Obsoleted(_))
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::VersionTooLow => write!(f, "version too low"),
            RejectReason::VersionTooHigh => write!(f, "version too high"),
            RejectReason::Conflict(other) => write!(f, "conflicts with {}", other),
            RejectReason::Obsoleted(other) => write!(f, "obsoleted by {}", other),
            RejectReason::Excluded => write!(f, "excluded"),
            RejectReason::DependencyFailed => write!(f, "its requirements cannot be satisfied"),
            RejectReason::Cycle => write!(f, "part of a requirement cycle"),
        }
    }
}

/// A candidate that was considered and rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub nevra: Nevra,
    pub repo: String,
    pub reason: RejectReason,
}

impl fmt::Display for RejectedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} ({})", self.nevra, self.repo, self.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    /// No candidate satisfies a dependency
    Unsatisfiable,
    /// Every candidate clashes with a package that must stay
    Conflict,
    /// A removal would break an installed package that requires it
    Blocked,
    /// Hard requirements form a cycle that cannot be ordered
    Cycle,
}

/// One reason a job cannot be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub kind: ProblemKind,
    pub unsatisfied: Dependency,
    pub requested_by: Requester,
    pub candidates: Vec<RejectedCandidate>,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProblemKind::Blocked => write!(
                f,
                "removal blocked: {} requires {}",
                self.requested_by, self.unsatisfied
            )?,
            ProblemKind::Cycle => write!(
                f,
                "requirement cycle: {} requires {}",
                self.requested_by, self.unsatisfied
            )?,
            ProblemKind::Unsatisfiable | ProblemKind::Conflict => match &self.requested_by {
                Requester::Job => write!(f, "cannot install {}", self.unsatisfied)?,
                Requester::Package(nevra) => {
                    write!(f, "{} requires {}", nevra, self.unsatisfied)?
                }
            },
        }

        if self.candidates.is_empty() && self.kind != ProblemKind::Cycle {
            write!(f, "\n  - no package provides {}", self.unsatisfied.name)?;
        }
        for candidate in &self.candidates {
            write!(f, "\n  - {}", candidate)?;
        }
        Ok(())
    }
}

/// All problems of one failed resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Problems(Vec<Problem>);

impl Problems {
    pub fn new(problems: Vec<Problem>) -> Self {
        Self(problems)
    }

    /// Add a problem unless one for the same dependency and requester exists
    pub fn push(&mut self, problem: Problem) {
        let duplicate = self.0.iter().any(|p| {
            p.unsatisfied == problem.unsatisfied && p.requested_by == problem.requested_by
        });
        if !duplicate {
            self.0.push(problem);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Problem> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_conflict(&self) -> bool {
        self.0.iter().any(|p| p.kind == ProblemKind::Conflict)
    }
}

impl<'a> IntoIterator for &'a Problems {
    type Item = &'a Problem;
    type IntoIter = std::slice::Iter<'a, Problem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Problems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, problem) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "Problem {}: {}", i + 1, problem)?;
        }
        Ok(())
    }
}
