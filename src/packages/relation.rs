// src/packages/relation.rs

//! Capabilities and dependencies between packages
//!
//! A package advertises [`Capability`] values (its provides) and declares
//! [`Dependency`] values (requires, conflicts, obsoletes). Matching the two is
//! the basic predicate the resolver is built on.

use crate::error::{Error, Result};
use crate::version::RpmVersion;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a versioned dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Equal => "=",
            Operator::GreaterEqual => ">=",
            Operator::Greater => ">",
        }
    }

    /// Map RPM metadata flags (`LT`, `LE`, `EQ`, `GE`, `GT`)
    pub fn from_rpm_flags(flags: &str) -> Option<Self> {
        match flags {
            "LT" => Some(Operator::Less),
            "LE" => Some(Operator::LessEqual),
            "EQ" => Some(Operator::Equal),
            "GE" => Some(Operator::GreaterEqual),
            "GT" => Some(Operator::Greater),
            _ => None,
        }
    }

    /// Map the comparison bits of an rpm header flags value
    pub fn from_sense(flags: u32) -> Option<Self> {
        const LESS: u32 = 0x02;
        const GREATER: u32 = 0x04;
        const EQUAL: u32 = 0x08;

        match flags & (LESS | GREATER | EQUAL) {
            LESS => Some(Operator::Less),
            f if f == LESS | EQUAL => Some(Operator::LessEqual),
            EQUAL => Some(Operator::Equal),
            f if f == GREATER | EQUAL => Some(Operator::GreaterEqual),
            GREATER => Some(Operator::Greater),
            _ => None,
        }
    }

    pub fn to_rpm_flags(&self) -> &'static str {
        match self {
            Operator::Less => "LT",
            Operator::LessEqual => "LE",
            Operator::Equal => "EQ",
            Operator::GreaterEqual => "GE",
            Operator::Greater => "GT",
        }
    }

    /// Whether `provided.cmp(required)` is acceptable for this operator
    pub fn accepts(&self, ord: Ordering) -> bool {
        match self {
            Operator::Less => ord == Ordering::Less,
            Operator::LessEqual => ord != Ordering::Greater,
            Operator::Equal => ord == Ordering::Equal,
            Operator::GreaterEqual => ord != Ordering::Less,
            Operator::Greater => ord == Ordering::Greater,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a package provides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    pub version: Option<RpmVersion>,
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn versioned(name: impl Into<String>, version: RpmVersion) -> Self {
        Self {
            name: name.into(),
            version: Some(version),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} = {}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Why a capability with the right name still fails a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMismatch {
    TooLow,
    TooHigh,
}

/// A requirement on (or a clash with) some capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<(Operator, RpmVersion)>,
    /// Weak dependencies (recommends/suggests) are never enforced
    pub optional: bool,
}

impl Dependency {
    /// Create a dependency with no version constraint
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
            optional: false,
        }
    }

    /// Create a dependency with a version constraint
    pub fn versioned(name: impl Into<String>, op: Operator, version: RpmVersion) -> Self {
        Self {
            name: name.into(),
            constraint: Some((op, version)),
            optional: false,
        }
    }

    pub fn into_optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Parse `name`, `name >= 1.0` or `name>=1.0`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some(op_start) = s.find(['<', '>', '=']) else {
            if s.is_empty() || s.contains(char::is_whitespace) {
                return Err(Error::ParseError(format!("Invalid dependency '{}'", s)));
            }
            return Ok(Self::new(s));
        };

        let name = s[..op_start].trim();
        let rest = &s[op_start..];
        let (op, version) = if let Some(v) = rest.strip_prefix(">=") {
            (Operator::GreaterEqual, v)
        } else if let Some(v) = rest.strip_prefix("<=") {
            (Operator::LessEqual, v)
        } else if let Some(v) = rest.strip_prefix("==") {
            (Operator::Equal, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (Operator::Greater, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (Operator::Less, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (Operator::Equal, v)
        } else {
            return Err(Error::ParseError(format!("Invalid dependency '{}'", s)));
        };

        if name.is_empty() {
            return Err(Error::ParseError(format!("Missing name in dependency '{}'", s)));
        }

        Ok(Self::versioned(name, op, RpmVersion::parse(version)?))
    }

    /// Check whether a capability satisfies this dependency
    pub fn is_satisfied_by(&self, capability: &Capability) -> bool {
        self.name == capability.name && self.mismatch(capability).is_none()
    }

    /// Version-level reason a same-named capability fails this dependency
    ///
    /// An unversioned capability satisfies any version constraint.
    pub fn mismatch(&self, capability: &Capability) -> Option<VersionMismatch> {
        let (op, required) = self.constraint.as_ref()?;
        let provided = capability.version.as_ref()?;
        let ord = provided.compare_for_match(required);
        if op.accepts(ord) {
            return None;
        }
        match ord {
            Ordering::Less => Some(VersionMismatch::TooLow),
            Ordering::Greater => Some(VersionMismatch::TooHigh),
            // Equal but rejected: the operator is strict
            Ordering::Equal => match op {
                Operator::Greater => Some(VersionMismatch::TooLow),
                _ => Some(VersionMismatch::TooHigh),
            },
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some((op, version)) => write!(f, "{}{}{}", self.name, op, version),
            None => write!(f, "{}", self.name),
        }
    }
}
