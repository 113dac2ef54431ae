// src/transaction/mod.rs

//! Transactions: ordered install and erase steps
//!
//! A [`Transaction`] is produced from a resolver [`Solution`] by
//! [`Transaction::build`] and carried out by an [`Executor`].

mod builder;
mod executor;

pub use executor::{
    Downloader, ExecutionReport, Executor, FailedStep, InstallTarget, Installer, Verifier,
};

use crate::error::Result;
use crate::packages::Package;
use crate::pool::Pool;
use crate::resolver::Solution;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Install,
    Erase,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Install => "install",
            StepKind::Erase => "erase",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One package operation
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub package: Package,
}

impl Step {
    pub fn new(kind: StepKind, package: Package) -> Self {
        Self { kind, package }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.package.nevra)
    }
}

/// An ordered, executable sequence of steps
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    steps: Vec<Step>,
}

impl Transaction {
    /// Order a solution into steps
    ///
    /// Fails with a `Cycle` problem when new packages require each other.
    pub fn build(pool: &Pool, solution: &Solution) -> Result<Self> {
        builder::build(pool, solution)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn installs(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.kind == StepKind::Install)
    }

    pub fn erasures(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.kind == StepKind::Erase)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {:<7} {}", step.kind.as_str(), step.package.nevra)?;
            if step.kind == StepKind::Install {
                write!(f, " ({})", step.package.repo)?;
            }
        }
        Ok(())
    }
}
