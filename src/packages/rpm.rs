// src/packages/rpm.rs

//! RPM artifact header reader
//!
//! Used after download to make sure the artifact on disk really is the build
//! the resolver selected.

use crate::error::{Error, Result};
use crate::packages::Nevra;
use crate::version::RpmVersion;
use rpm::Package;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Identity and provenance read from an RPM header
#[derive(Debug, Clone)]
pub struct RpmHeader {
    pub nevra: Nevra,
    pub source_rpm: Option<String>,
    pub vendor: Option<String>,
}

impl RpmHeader {
    /// Read the header of an RPM file
    pub fn read(path: &Path) -> Result<Self> {
        debug!("Reading RPM header: {}", path.display());

        let file = File::open(path)
            .map_err(|e| Error::IoError(format!("Failed to open RPM file {}: {}", path.display(), e)))?;

        let mut buf_reader = BufReader::new(file);

        let pkg = Package::parse(&mut buf_reader)
            .map_err(|e| Error::ParseError(format!("Failed to parse RPM {}: {}", path.display(), e)))?;

        let name = pkg
            .metadata
            .get_name()
            .map_err(|e| Error::ParseError(format!("Failed to get package name: {}", e)))?
            .to_string();

        let version = pkg
            .metadata
            .get_version()
            .map_err(|e| Error::ParseError(format!("Failed to get package version: {}", e)))?
            .to_string();

        let release = pkg.metadata.get_release().ok().map(|s| s.to_string());
        // Packages without an epoch tag have epoch 0
        let epoch = pkg.metadata.get_epoch().map(u64::from).unwrap_or(0);
        let arch = pkg
            .metadata
            .get_arch()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "noarch".to_string());

        let source_rpm = pkg.metadata.get_source_rpm().ok().map(|s| s.to_string());
        let vendor = pkg.metadata.get_vendor().ok().map(|s| s.to_string());

        Ok(Self {
            nevra: Nevra::new(name, RpmVersion::new(epoch, version, release), arch),
            source_rpm,
            vendor,
        })
    }

    /// Whether this header describes exactly `expected`
    pub fn matches(&self, expected: &Nevra) -> bool {
        self.nevra.key() == expected.key()
    }
}
