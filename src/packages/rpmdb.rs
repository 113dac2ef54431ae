// src/packages/rpmdb.rs

//! Installed packages as recorded by the system rpm database
//!
//! `rpm -qa` runs with a query format that prints one tab-separated header
//! line per package, followed by one line per provide, requirement,
//! conflict, obsolete and listed file.

use super::{Capability, Dependency, INSTALLED_REPO, Operator, Package};
use crate::error::{Error, Result};
use crate::version::RpmVersion;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};

const QUERY_FORMAT: &str = concat!(
    "@\t%{NAME}\t%{EPOCHNUM}\t%{VERSION}\t%{RELEASE}\t%{ARCH}\t%{SUMMARY}\n",
    "[P\t%{PROVIDENAME}\t%{PROVIDEFLAGS}\t%{PROVIDEVERSION}\n]",
    "[R\t%{REQUIRENAME}\t%{REQUIREFLAGS}\t%{REQUIREVERSION}\n]",
    "[C\t%{CONFLICTNAME}\t%{CONFLICTFLAGS}\t%{CONFLICTVERSION}\n]",
    "[O\t%{OBSOLETENAME}\t%{OBSOLETEFLAGS}\t%{OBSOLETEVERSION}\n]",
    "[F\t%{FILENAMES}\n]",
);

/// RPMSENSE_RPMLIB: a feature of rpm itself
const SENSE_RPMLIB: u32 = 1 << 24;

/// Imported signing keys show up as packages of this name
const PUBKEY_PACKAGE: &str = "gpg-pubkey";

/// Files that rpm-md primary metadata lists, and so the only paths
/// repository packages can require
fn is_primary_file(path: &str) -> bool {
    path.starts_with("/etc/") || path.contains("bin/") || path == "/usr/lib/sendmail"
}

/// Reads the installed set with `rpm -qa`
#[derive(Debug, Clone)]
pub struct RpmDatabase {
    program: PathBuf,
    root: Option<PathBuf>,
}

impl Default for RpmDatabase {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rpm"),
            root: None,
        }
    }
}

impl RpmDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable in place of `rpm`
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Query an alternate root (`rpm --root`)
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(root) = &self.root {
            args.push("--root".into());
            args.push(root.clone().into_os_string());
        }
        args.extend(["-qa", "--qf", QUERY_FORMAT].map(OsString::from));
        args
    }

    /// Every installed package with its relations
    ///
    /// A missing `rpm` executable surfaces as `Error::Io` with kind
    /// `NotFound`.
    pub fn installed(&self) -> Result<Vec<Package>> {
        debug!("Querying installed packages with {}", self.program.display());
        let output = Command::new(&self.program).args(self.args()).output()?;

        if !output.status.success() {
            return Err(Error::IoError(format!(
                "{} -qa failed ({}): {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let packages = parse_query(&String::from_utf8_lossy(&output.stdout));
        info!("rpm database lists {} installed packages", packages.len());
        Ok(packages)
    }
}

/// Parse the output of `rpm -qa --qf` with [`QUERY_FORMAT`]
///
/// Malformed records are skipped with a warning.
pub fn parse_query(output: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    let mut current: Option<Package> = None;

    for line in output.lines().filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            ["@", name, epoch, version, release, arch, summary @ ..] => {
                packages.extend(current.take());
                current = header(name, epoch, version, release, arch, &summary.join("\t"));
            }
            [tag, name, flags, version] if matches!(*tag, "P" | "R" | "C" | "O") => {
                if let Some(pkg) = current.as_mut() {
                    add_relation(pkg, tag, name, flags, version);
                }
            }
            ["F", path] => {
                if let Some(pkg) = current.as_mut() {
                    if is_primary_file(path) {
                        pkg.provides.push(Capability::new(*path));
                    }
                }
            }
            _ => warn!("Skipping unrecognized rpm database line: {}", line),
        }
    }
    packages.extend(current);
    packages
}

fn header(
    name: &str,
    epoch: &str,
    version: &str,
    release: &str,
    arch: &str,
    summary: &str,
) -> Option<Package> {
    if name == PUBKEY_PACKAGE {
        return None;
    }
    if name.is_empty() || version.is_empty() {
        warn!("Skipping installed package with incomplete header: {:?}", name);
        return None;
    }

    let epoch = match epoch.parse() {
        Ok(epoch) => epoch,
        Err(_) if epoch == "(none)" => 0,
        Err(_) => {
            warn!("Skipping {}: bad epoch '{}'", name, epoch);
            return None;
        }
    };
    let release = (!release.is_empty() && release != "(none)").then(|| release.to_string());

    let mut pkg = Package::new(name, RpmVersion::new(epoch, version, release), arch);
    pkg.repo = INSTALLED_REPO.to_string();
    if summary != "(none)" {
        pkg.summary = summary.to_string();
    }
    Some(pkg)
}

fn add_relation(pkg: &mut Package, tag: &str, name: &str, flags: &str, version: &str) {
    let flags: u32 = flags.parse().unwrap_or(0);
    // Rich dependencies and rpm's own features have no equivalent in
    // repository metadata
    if name.starts_with('(') || name.starts_with("rpmlib(") || flags & SENSE_RPMLIB != 0 {
        return;
    }

    let version = if version.is_empty() {
        None
    } else {
        match RpmVersion::parse(version) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("Ignoring version of {} on {}: {}", name, pkg.nevra, e);
                None
            }
        }
    };

    if tag == "P" {
        pkg.provides.push(match version {
            Some(version) => Capability::versioned(name, version),
            None => Capability::new(name),
        });
        return;
    }

    let dep = match (Operator::from_sense(flags), version) {
        (Some(op), Some(version)) => Dependency::versioned(name, op, version),
        _ => Dependency::new(name),
    };
    match tag {
        "R" => pkg.requires.push(dep),
        "C" => pkg.conflicts.push(dep),
        _ => pkg.obsoletes.push(dep),
    }
}
