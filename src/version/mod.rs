// src/version/mod.rs

//! Version handling for RPM-style package versions
//!
//! Versions have the form `[epoch:]version[-release]`. Ordering compares the
//! epoch numerically, then the version and release strings segment by segment
//! using the rules implemented by [`rpmvercmp`].

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed RPM version with epoch, version, and release components
#[derive(Debug, Clone)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    pub fn new(epoch: u64, version: impl Into<String>, release: Option<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release,
        }
    }

    /// Parse an RPM version string
    ///
    /// Format: [epoch:]version[-release]
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1.2.3-4.el8" → epoch=0, version="1.2.3", release=Some("4.el8")
    /// - "1:2.3.4-5.el8" → epoch=1, version="2.3.4", release=Some("5.el8")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("", s),
        };

        let epoch = if epoch_str.is_empty() {
            0 // Empty epoch (e.g., ":1.0.0") defaults to 0
        } else {
            epoch_str.parse::<u64>().map_err(|e| {
                Error::ParseError(format!("Invalid epoch in version '{}': {}", s, e))
            })?
        };

        // The release is everything after the last dash
        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) if !r.is_empty() => (v.to_string(), Some(r.to_string())),
            Some((v, _)) => (v.to_string(), None),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty version component in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Total ordering of two versions
    ///
    /// A missing release sorts before any present release.
    pub fn compare(&self, other: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                (a, b) => a.is_some().cmp(&b.is_some()),
            })
    }

    /// Ordering used when matching a capability against a dependency
    ///
    /// Releases only take part when both sides carry one, so `libfoo >= 2.0`
    /// is satisfied by `libfoo-2.0-3`.
    pub fn compare_for_match(&self, required: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&required.epoch)
            .then_with(|| rpmvercmp(&self.version, &required.version))
            .then_with(|| match (&self.release, &required.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                _ => Ordering::Equal,
            })
    }
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl PartialEq for RpmVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for RpmVersion {}

impl Ord for RpmVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for RpmVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One comparable run of a version string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Tilde,
    Alpha(&'a str),
    Numeric(&'a str),
    End,
}

impl Segment<'_> {
    /// Rank between segments of different kinds.
    ///
    /// `End` sits between alphabetic and numeric runs: a trailing numeric run
    /// makes a version newer, a trailing alphabetic run (a pre-release tag)
    /// makes it older, and a tilde is older than anything.
    fn rank(&self) -> u8 {
        match self {
            Segment::Tilde => 0,
            Segment::Alpha(_) => 1,
            Segment::End => 2,
            Segment::Numeric(_) => 3,
        }
    }

    fn compare(&self, other: &Segment<'_>) -> Ordering {
        match (self, other) {
            (Segment::Numeric(a), Segment::Numeric(b)) => {
                let a = a.trim_start_matches('0');
                let b = b.trim_start_matches('0');
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Segment::Alpha(a), Segment::Alpha(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

struct Segments<'a> {
    rest: &'a str,
}

impl<'a> Segments<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }

    fn next_segment(&mut self) -> Segment<'a> {
        let trimmed = self
            .rest
            .trim_start_matches(|c: char| !c.is_ascii_alphanumeric() && c != '~');
        let Some(first) = trimmed.chars().next() else {
            self.rest = trimmed;
            return Segment::End;
        };

        if first == '~' {
            self.rest = &trimmed[1..];
            return Segment::Tilde;
        }

        let numeric = first.is_ascii_digit();
        let end = if numeric {
            trimmed.find(|c: char| !c.is_ascii_digit())
        } else {
            trimmed.find(|c: char| !c.is_ascii_alphabetic())
        }
        .unwrap_or(trimmed.len());

        let (run, rest) = trimmed.split_at(end);
        self.rest = rest;
        if numeric {
            Segment::Numeric(run)
        } else {
            Segment::Alpha(run)
        }
    }
}

/// Compare two version (or release) strings segment by segment
///
/// Strings are split into maximal runs of digits and of letters; any other
/// character only separates runs. Numeric runs compare numerically, alphabetic
/// runs lexically, and a numeric run is newer than an alphabetic one.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut left = Segments::new(a);
    let mut right = Segments::new(b);
    loop {
        let l = left.next_segment();
        let r = right.next_segment();
        match l.compare(&r) {
            Ordering::Equal if l == Segment::End => return Ordering::Equal,
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> RpmVersion {
        RpmVersion::parse(s).unwrap()
    }

    #[test]
    fn test_rpm_version_parse_simple() {
        let v = RpmVersion::parse("1.2.3").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.2.3");
        assert_eq!(v.release, None);
    }

    #[test]
    fn test_rpm_version_parse_full() {
        let v = RpmVersion::parse("1:2.3.4-5.el8").unwrap();
        assert_eq!(v.epoch, 1);
        assert_eq!(v.version, "2.3.4");
        assert_eq!(v.release, Some("5.el8".to_string()));
    }

    #[test]
    fn test_rpm_version_parse_release_uses_last_dash() {
        let v = RpmVersion::parse("1.0-beta-3").unwrap();
        assert_eq!(v.version, "1.0-beta");
        assert_eq!(v.release.as_deref(), Some("3"));
    }

    #[test]
    fn test_rpm_version_parse_empty_epoch() {
        let v = RpmVersion::parse(":1.02.208-2.fc43").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.02.208");
    }

    #[test]
    fn test_rpm_version_parse_rejects_garbage() {
        assert!(RpmVersion::parse("x:1.0").is_err());
        assert!(RpmVersion::parse("").is_err());
        assert!(RpmVersion::parse("3:").is_err());
    }

    #[test]
    fn test_documented_chain() {
        assert!(v("1.2.3-1") < v("1.2.3-2"));
        assert!(v("1.2.3-2") < v("1.3.0-1"));
        assert!(v("1.3.0-1") < v("2:1.0-1"));
    }

    #[test]
    fn test_numeric_segments_compare_numerically() {
        assert_eq!(rpmvercmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.010", "1.10"), Ordering::Equal);
        assert_eq!(rpmvercmp("2.0", "10.0"), Ordering::Less);
    }

    #[test]
    fn test_alpha_and_trailing_segments() {
        assert_eq!(rpmvercmp("1.0a", "1.0b"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0.1", "1.0"), Ordering::Greater);
        // A trailing alphabetic run is a pre-release
        assert_eq!(rpmvercmp("1.0rc1", "1.0"), Ordering::Less);
        // Numeric runs beat alphabetic runs
        assert_eq!(rpmvercmp("1.0.1", "1.0.a"), Ordering::Greater);
    }

    #[test]
    fn test_tilde_sorts_first() {
        assert_eq!(rpmvercmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0~", "1.0a"), Ordering::Less);
    }

    #[test]
    fn test_separators_are_ignored() {
        assert_eq!(rpmvercmp("1.0", "1_0"), Ordering::Equal);
        assert_eq!(v("1.0-1"), v("1_0-1"));
    }

    #[test]
    fn test_ordering_is_total_and_transitive() {
        let samples = [
            "1", "1.0", "1.0.0", "1.0a", "1.0~rc1", "1.0.1", "1.a", "a", "2", "10", "1.10",
            "1.9", "0:1.0-1", "1:0.1", "1.0-1", "1.0-2", "1.0-1a", "1.0-1~1",
        ];
        let versions: Vec<RpmVersion> = samples.iter().map(|s| v(s)).collect();

        for a in &versions {
            for b in &versions {
                let ab = a.cmp(b);
                assert_eq!(ab, b.cmp(a).reverse(), "antisymmetry for {} / {}", a, b);
                for c in &versions {
                    if a <= b && b <= c {
                        assert!(a <= c, "transitivity for {} <= {} <= {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compare_for_match_ignores_missing_release() {
        let provided = v("2.0-3");
        assert_eq!(provided.compare_for_match(&v("2.0")), Ordering::Equal);
        assert_eq!(provided.compare_for_match(&v("2.0-4")), Ordering::Less);
        assert_eq!(provided.cmp(&v("2.0")), Ordering::Greater);
    }

    #[test]
    fn test_rpm_version_display() {
        assert_eq!(v("1.2.3").to_string(), "1.2.3");
        assert_eq!(v("2:1.2.3-4.el8").to_string(), "2:1.2.3-4.el8");
        assert_eq!(v("0:1.0-1").to_string(), "1.0-1");
    }
}
