// src/repository/gpg.rs

//! Artifact verification
//!
//! A downloaded package is accepted when its SHA-256 matches the metadata,
//! its RPM header names the expected NEVRA, and, for repositories with
//! `gpgcheck`, a detached signature (`<artifact>.asc`) verifies against the
//! repository key `<keyring>/<repo>.asc`.

use crate::error::{Error, Result};
use crate::packages::Package;
use crate::packages::rpm::RpmHeader;
use crate::transaction::Verifier;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use sequoia_openpgp as openpgp;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Path of the detached signature that accompanies `artifact`
pub fn signature_path(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(".asc");
    PathBuf::from(name)
}

/// SHA-256 of a file, hex encoded
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Checks downloaded artifacts against metadata and repository keys
pub struct PackageVerifier {
    keyring_dir: PathBuf,
    policy: StandardPolicy<'static>,
}

impl PackageVerifier {
    pub fn new(keyring_dir: impl Into<PathBuf>) -> Self {
        Self {
            keyring_dir: keyring_dir.into(),
            policy: StandardPolicy::new(),
        }
    }

    fn key_path(&self, repo: &str) -> PathBuf {
        self.keyring_dir.join(format!("{}.asc", repo))
    }

    pub fn has_key(&self, repo: &str) -> bool {
        self.key_path(repo).is_file()
    }

    /// Store a repository public key, returning its fingerprint
    pub fn import_key(&self, key_data: &[u8], repo: &str) -> Result<String> {
        let cert = openpgp::Cert::from_bytes(key_data)
            .map_err(|e| Error::ParseError(format!("Failed to parse OpenPGP key: {}", e)))?;
        let fingerprint = cert.fingerprint().to_string();

        fs::create_dir_all(&self.keyring_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create keyring directory {}: {}",
                self.keyring_dir.display(),
                e
            ))
        })?;
        fs::write(self.key_path(repo), key_data)
            .map_err(|e| Error::IoError(format!("Failed to write key for {}: {}", repo, e)))?;

        info!("Imported key for repository '{}' ({})", repo, fingerprint);
        Ok(fingerprint)
    }

    /// Verify the detached signature of `artifact` with the key of `repo`
    pub fn verify_signature(&self, artifact: &Path, signature: &Path, repo: &str) -> Result<()> {
        let key_path = self.key_path(repo);
        let key_data = fs::read(&key_path).map_err(|_| {
            Error::VerificationError(format!(
                "No signing key for repository '{}' at {}",
                repo,
                key_path.display()
            ))
        })?;
        let cert = openpgp::Cert::from_bytes(&key_data)
            .map_err(|e| Error::ParseError(format!("Failed to parse key for {}: {}", repo, e)))?;

        let message = fs::read(artifact)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", artifact.display(), e)))?;
        let signature_data = fs::read(signature).map_err(|_| {
            Error::VerificationError(format!("Missing signature {}", signature.display()))
        })?;
        let pile = openpgp::PacketPile::from_bytes(&signature_data)
            .map_err(|e| Error::ParseError(format!("Failed to parse signature: {}", e)))?;

        for packet in pile.descendants() {
            let openpgp::Packet::Signature(sig) = packet else {
                continue;
            };
            let mut sig = sig.clone();
            for key in cert.keys().with_policy(&self.policy, None).for_signing() {
                if sig.verify_message(key.key(), &message).is_ok() {
                    debug!("Signature on {} verified", artifact.display());
                    return Ok(());
                }
            }
        }

        Err(Error::VerificationError(format!(
            "No valid signature from '{}' on {}",
            repo,
            artifact.display()
        )))
    }

    /// Run every check, reporting the first failure
    pub fn check(&self, path: &Path, package: &Package) -> Result<()> {
        if let Some(expected) = &package.checksum {
            let actual = file_sha256(path)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let header = RpmHeader::read(path)?;
        if !header.matches(&package.nevra) {
            return Err(Error::VerificationError(format!(
                "{} contains {}, expected {}",
                path.display(),
                header.nevra,
                package.nevra
            )));
        }

        if package.gpgcheck {
            self.verify_signature(path, &signature_path(path), &package.repo)?;
        }
        Ok(())
    }
}

impl Verifier for PackageVerifier {
    fn verify(&self, path: &Path, package: &Package) -> bool {
        match self.check(path, package) {
            Ok(()) => true,
            Err(e) => {
                warn!("Rejecting {}: {}", path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::RpmVersion;
    use tempfile::TempDir;

    fn package(checksum: Option<&str>) -> Package {
        let mut pkg = Package::new("foo", RpmVersion::parse("1.0-1").unwrap(), "x86_64");
        pkg.repo = "main".to_string();
        pkg.checksum = checksum.map(str::to_string);
        pkg
    }

    #[test]
    fn test_signature_path() {
        assert_eq!(
            signature_path(Path::new("/cache/foo-1.0-1.x86_64.rpm")),
            PathBuf::from("/cache/foo-1.0-1.x86_64.rpm.asc")
        );
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("foo.rpm");
        fs::write(&artifact, b"hello").unwrap();
        let verifier = PackageVerifier::new(temp.path().join("keys"));

        let result = verifier.check(&artifact, &package(Some("00")));
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
        assert!(!verifier.verify(&artifact, &package(Some("00"))));
    }

    #[test]
    fn test_garbage_artifact_rejected() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("foo.rpm");
        fs::write(&artifact, b"hello").unwrap();
        let digest = file_sha256(&artifact).unwrap();
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        // Checksum passes but the header cannot be read
        let verifier = PackageVerifier::new(temp.path().join("keys"));
        assert!(!verifier.verify(&artifact, &package(Some(&digest))));
    }

    #[test]
    fn test_missing_key_is_verification_error() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("foo.rpm");
        fs::write(&artifact, b"hello").unwrap();
        let verifier = PackageVerifier::new(temp.path().join("keys"));

        assert!(!verifier.has_key("main"));
        let result = verifier.verify_signature(&artifact, &signature_path(&artifact), "main");
        assert!(matches!(result, Err(Error::VerificationError(_))));
    }

    #[test]
    fn test_import_rejects_garbage_key() {
        let temp = TempDir::new().unwrap();
        let verifier = PackageVerifier::new(temp.path());
        assert!(verifier.import_key(b"not a key", "main").is_err());
        assert!(!verifier.has_key("main"));
    }
}
