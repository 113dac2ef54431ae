// src/repository/parsers/mod.rs

//! Repository metadata parsers
//!
//! A parser knows where a repository keeps its index, how to find the
//! package list inside that index, and how to turn the package list into
//! [`Package`] records. Transport and caching live elsewhere.

pub mod rpmmd;

use crate::error::{Error, Result};
use crate::packages::Package;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use tracing::debug;

pub use rpmmd::RpmMdParser;

/// Where the package list lives, as announced by the repository index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLocation {
    /// Path relative to the repository base URL
    pub href: String,
    /// (algorithm, hex digest) of the file as stored
    pub checksum: Option<(String, String)>,
}

impl DataLocation {
    /// Last path component, used as the cache file name
    pub fn file_name(&self) -> &str {
        self.href.rsplit('/').next().unwrap_or(&self.href)
    }
}

/// Repository metadata parser
pub trait RepositoryParser: Send + Sync {
    /// Path of the repository index, relative to the base URL
    fn index_path(&self) -> &'static str;

    /// Find the package list in the repository index
    fn parse_index(&self, index: &[u8]) -> Result<DataLocation>;

    /// Parse a decompressed package list
    ///
    /// Package locations are resolved against `base_url`.
    fn parse_packages(&self, data: &[u8], base_url: &str) -> Result<Vec<Package>>;
}

/// Parser for a configured repository type
pub fn parser_for(repo_type: &str) -> Result<Box<dyn RepositoryParser>> {
    match repo_type {
        crate::repository::config::RPM_MD => Ok(Box::new(RpmMdParser::new())),
        other => Err(Error::ConfigError(format!(
            "Unsupported repository type '{}'",
            other
        ))),
    }
}

/// Decompress metadata according to its file extension
pub fn decompress(name: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if name.ends_with(".gz") {
        debug!("Decompressing gzip metadata {}", name);
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| Error::ParseError(format!("Failed to decompress {}: {}", name, e)))?;
    } else if name.ends_with(".zst") {
        debug!("Decompressing zstd metadata {}", name);
        out = zstd::decode_all(bytes)
            .map_err(|e| Error::ParseError(format!("Failed to decompress {}: {}", name, e)))?;
    } else if name.ends_with(".xz") {
        debug!("Decompressing xz metadata {}", name);
        xz2::read::XzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| Error::ParseError(format!("Failed to decompress {}: {}", name, e)))?;
    } else {
        out.extend_from_slice(bytes);
    }
    Ok(out)
}

/// Hex digest of `bytes`, or `None` for algorithms we do not check
pub fn digest(algorithm: &str, bytes: &[u8]) -> Option<String> {
    match algorithm {
        "sha256" => Some(format!("{:x}", Sha256::digest(bytes))),
        "sha512" => Some(format!("{:x}", Sha512::digest(bytes))),
        _ => None,
    }
}

/// Check downloaded metadata against the digest announced in the index
pub fn verify_data(location: &DataLocation, bytes: &[u8]) -> Result<()> {
    let Some((algorithm, expected)) = &location.checksum else {
        return Ok(());
    };
    match digest(algorithm, bytes) {
        Some(actual) if actual.eq_ignore_ascii_case(expected) => Ok(()),
        Some(actual) => Err(Error::ChecksumMismatch {
            expected: expected.clone(),
            actual,
        }),
        None => {
            debug!("Not checking {} digest of {}", algorithm, location.href);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    #[test]
    fn test_decompress_by_extension() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<metadata/>").unwrap();
        let gz = encoder.finish().unwrap();
        assert_eq!(decompress("primary.xml.gz", &gz).unwrap(), b"<metadata/>");

        let zst = zstd::encode_all(&b"<metadata/>"[..], 0).unwrap();
        assert_eq!(decompress("primary.xml.zst", &zst).unwrap(), b"<metadata/>");

        assert_eq!(decompress("primary.xml", b"<metadata/>").unwrap(), b"<metadata/>");
        assert!(decompress("primary.xml.gz", b"not gzip").is_err());
    }

    #[test]
    fn test_verify_data() {
        let data = b"hello";
        let good = DataLocation {
            href: "repodata/primary.xml".to_string(),
            checksum: Some((
                "sha256".to_string(),
                "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".to_string(),
            )),
        };
        assert!(verify_data(&good, data).is_ok());

        let bad = DataLocation {
            checksum: Some(("sha256".to_string(), "00".to_string())),
            ..good.clone()
        };
        assert!(matches!(verify_data(&bad, data), Err(Error::ChecksumMismatch { .. })));

        let unchecked = DataLocation {
            checksum: Some(("md5".to_string(), "00".to_string())),
            ..good
        };
        assert!(verify_data(&unchecked, data).is_ok());
    }

    #[test]
    fn test_parser_for_unknown_type() {
        assert!(parser_for("rpm-md").is_ok());
        assert!(matches!(parser_for("deb"), Err(Error::ConfigError(_))));
    }
}
