// src/repository/mod.rs

//! Repository management and package downloading
//!
//! This module provides functionality for:
//! - Reading and editing the repository list
//! - Refreshing rpm-md metadata into the local cache
//! - Turning cached metadata into pool snapshots
//! - Downloading and verifying package artifacts

pub mod cache;
pub mod config;
pub mod gpg;
pub mod parsers;

pub use cache::{CacheEntry, MetadataCache};
pub use config::{Repository, SourcesList};
pub use gpg::PackageVerifier;

use crate::error::{Error, Result};
use crate::pool::RepoSnapshot;
use crate::transaction::Downloader;
use parsers::{RepositoryParser, decompress, parser_for, verify_data};
use rayon::prelude::*;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Base URLs listed in a mirrorlist body: one per line, `#` starts a comment
pub fn parse_mirrorlist(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Primary metadata as downloaded for one repository
#[derive(Debug, Clone)]
pub struct FetchedMetadata {
    /// Base URL that served it
    pub base_url: String,
    /// File name, including compression suffix
    pub primary: String,
    pub data: Vec<u8>,
}

/// HTTP client wrapper with retry support
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl RepositoryClient {
    /// Create a new repository client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Open a URL for reading; `file://` URLs are read from disk
    fn open(&self, url: &str) -> Result<Box<dyn Read>> {
        if let Some(path) = url.strip_prefix("file://") {
            let file = File::open(path)
                .map_err(|e| Error::DownloadError(format!("Failed to open {}: {}", url, e)))?;
            return Ok(Box::new(file));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::DownloadError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }
                    return Ok(Box::new(response));
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to fetch {} after {} attempts: {}",
                            url, attempt, e
                        )));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(self.retry_delay * attempt);
                }
            }
        }
    }

    /// Fetch a URL into memory
    pub fn get(&self, url: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open(url)?
            .read_to_end(&mut data)
            .map_err(|e| Error::DownloadError(format!("Failed to read {}: {}", url, e)))?;
        Ok(data)
    }

    /// Download a URL to `dest_path`, replacing it atomically
    pub fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        debug!("Downloading {} to {}", url, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let mut reader = self.open(url)?;
        let temp_path = dest_path.with_extension("part");
        let mut file = File::create(&temp_path).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {}", temp_path.display(), e))
        })?;
        if let Err(e) = io::copy(&mut reader, &mut file) {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::DownloadError(format!("Failed to download {}: {}", url, e)));
        }

        fs::rename(&temp_path, dest_path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {}",
                temp_path.display(),
                dest_path.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Base URLs to try for a repository, configured URL first
    fn base_urls(&self, repo: &Repository) -> Vec<String> {
        let mut urls = vec![repo.url.clone()];
        if let Some(mirrorlist) = &repo.mirrorlist {
            match self.get(mirrorlist) {
                Ok(body) => urls.extend(
                    parse_mirrorlist(&String::from_utf8_lossy(&body))
                        .into_iter()
                        .filter(|url| *url != repo.url),
                ),
                Err(e) => warn!("Mirrorlist for {} unavailable: {}", repo.name, e),
            }
        }
        urls
    }

    fn fetch_from(&self, parser: &dyn RepositoryParser, base: &str) -> Result<FetchedMetadata> {
        let index = self.get(&join_url(base, parser.index_path()))?;
        let location = parser.parse_index(&index)?;
        let data = self.get(&join_url(base, &location.href))?;
        verify_data(&location, &data)?;
        Ok(FetchedMetadata {
            base_url: base.to_string(),
            primary: location.file_name().to_string(),
            data,
        })
    }

    /// Download the primary metadata of a repository
    ///
    /// Mirrors are tried in turn when the configured URL fails.
    pub fn fetch_metadata(&self, repo: &Repository) -> Result<FetchedMetadata> {
        let parser = parser_for(&repo.repo_type)?;
        // The mirrorlist is only consulted once the configured URL has failed
        let mut last_error = match self.fetch_from(parser.as_ref(), &repo.url) {
            Ok(fetched) => return Ok(fetched),
            Err(e) => {
                warn!("Repository {} at {} failed: {}", repo.name, repo.url, e);
                e
            }
        };
        for base in self.base_urls(repo).into_iter().skip(1) {
            match self.fetch_from(parser.as_ref(), &base) {
                Ok(fetched) => {
                    info!("Repository {} served by mirror {}", repo.name, base);
                    return Ok(fetched);
                }
                Err(e) => {
                    warn!("Mirror {} for {} failed: {}", base, repo.name, e);
                    last_error = e;
                }
            }
        }
        Err(Error::MetadataError {
            repo: repo.name.clone(),
            reason: last_error.to_string(),
        })
    }
}

/// Outcome of a metadata refresh
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

/// Refresh metadata for every enabled repository
///
/// Repositories are fetched concurrently. The cache is only written once
/// every fetch has finished, under the exclusive cache lock. A repository
/// that fails is reported and keeps its previous cached copy.
pub fn refresh(
    client: &RepositoryClient,
    sources: &SourcesList,
    cache: &MetadataCache,
) -> Result<RefreshReport> {
    let repos: Vec<&Repository> = sources.enabled().collect();
    for repo in &repos {
        parser_for(&repo.repo_type).map_err(|e| match e {
            Error::ConfigError(msg) => Error::ConfigError(format!("{}: {}", repo.name, msg)),
            other => other,
        })?;
    }

    info!("Refreshing {} repositories", repos.len());
    let results: Vec<(&Repository, Result<FetchedMetadata>)> = repos
        .par_iter()
        .map(|repo| (*repo, client.fetch_metadata(repo)))
        .collect();

    let lock = cache.lock()?;
    let mut report = RefreshReport::default();
    for (repo, result) in results {
        let stored = result.and_then(|fetched| {
            let entry = CacheEntry {
                refreshed_at: chrono::Utc::now(),
                base_url: fetched.base_url,
                primary: fetched.primary,
            };
            cache.store(&lock, &repo.name, &entry, &fetched.data)
        });
        match stored {
            Ok(()) => report.refreshed.push(repo.name.clone()),
            Err(e) => {
                warn!("Repository {} not refreshed: {}", repo.name, e);
                report.failed.push((repo.name.clone(), e));
            }
        }
    }
    Ok(report)
}

/// Fetch and import the signing key of `repo` if the keyring lacks it
///
/// Returns the fingerprint of a newly imported key, or `None` when the
/// repository names no key or its key is already present.
pub fn fetch_key(
    client: &RepositoryClient,
    repo: &Repository,
    verifier: &PackageVerifier,
) -> Result<Option<String>> {
    let Some(key_url) = &repo.gpgkey else {
        debug!("No signing key configured for repository '{}'", repo.name);
        return Ok(None);
    };
    if verifier.has_key(&repo.name) {
        debug!("Signing key for '{}' already present", repo.name);
        return Ok(None);
    }

    info!("Fetching signing key for '{}' from {}", repo.name, key_url);
    let key_data = client.get(key_url).map_err(|e| {
        Error::DownloadError(format!("Failed to fetch key for '{}': {}", repo.name, e))
    })?;
    verifier.import_key(&key_data, &repo.name).map(Some)
}

fn load_repository(repo: &Repository, cache: &MetadataCache) -> Result<Vec<crate::packages::Package>> {
    let parser = parser_for(&repo.repo_type)?;
    let (entry, data) = cache.read(&repo.name)?.ok_or_else(|| Error::MetadataError {
        repo: repo.name.clone(),
        reason: "never refreshed; run `zenit update`".to_string(),
    })?;
    let xml = decompress(&entry.primary, &data)?;
    parser.parse_packages(&xml, &entry.base_url)
}

/// Pool input for every configured repository
///
/// Disabled repositories are passed through (the pool skips them); enabled
/// ones whose cache is missing or unreadable become unavailable snapshots.
pub fn load_snapshots(sources: &SourcesList, cache: &MetadataCache) -> Vec<RepoSnapshot> {
    sources
        .repos()
        .par_iter()
        .map(|repo| {
            if !repo.enabled {
                return RepoSnapshot::loaded(repo.clone(), Vec::new());
            }
            match load_repository(repo, cache) {
                Ok(packages) => RepoSnapshot::loaded(repo.clone(), packages),
                Err(e) => RepoSnapshot::unavailable(repo.clone(), e.to_string()),
            }
        })
        .collect()
}

/// Downloads artifacts into the package cache
pub struct PackageDownloader<'a> {
    client: &'a RepositoryClient,
    dest_dir: PathBuf,
}

impl<'a> PackageDownloader<'a> {
    pub fn new(client: &'a RepositoryClient, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dest_dir: dest_dir.into(),
        }
    }
}

impl Downloader for PackageDownloader<'_> {
    fn fetch(&self, url: &str, name: &str) -> Result<PathBuf> {
        let dest = self.dest_dir.join(name);
        self.client.download_file(url, &dest)?;

        // Detached signatures are optional here; the verifier decides
        let signature_url = format!("{}.asc", url);
        let signature = gpg::signature_path(&dest);
        if let Err(e) = self.client.download_file(&signature_url, &signature) {
            debug!("No signature for {}: {}", name, e);
            let _ = fs::remove_file(&signature);
        }

        info!("Downloaded {}", name);
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use sha2::{Digest, Sha256};
    use std::io::Write;
    use tempfile::TempDir;

    const PRIMARY: &str = r#"<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
<package type="rpm">
  <name>foo</name><arch>noarch</arch>
  <version epoch="0" ver="1.0" rel="1"/>
  <summary>Foo</summary>
  <location href="Packages/foo-1.0-1.noarch.rpm"/>
  <format><rpm:requires><rpm:entry name="bar"/></rpm:requires></format>
</package>
</metadata>"#;

    /// Lay out an rpm-md repository with gzip primary metadata
    fn write_repo(dir: &Path, corrupt_checksum: bool) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(PRIMARY.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();
        let digest = if corrupt_checksum {
            "00".to_string()
        } else {
            format!("{:x}", Sha256::digest(&gz))
        };

        fs::create_dir_all(dir.join("repodata")).unwrap();
        fs::write(dir.join("repodata/primary.xml.gz"), &gz).unwrap();
        fs::write(
            dir.join("repodata/repomd.xml"),
            format!(
                r#"<repomd><data type="primary"><checksum type="sha256">{}</checksum><location href="repodata/primary.xml.gz"/></data></repomd>"#,
                digest
            ),
        )
        .unwrap();
    }

    fn sources(temp: &TempDir, repos: Vec<Repository>) -> SourcesList {
        let mut sources = SourcesList::load(&temp.path().join("sources.list")).unwrap();
        for repo in repos {
            sources.add(repo).unwrap();
        }
        sources
    }

    #[test]
    fn test_parse_mirrorlist() {
        let body = "# mirrors\nhttps://a.example/os\n\n  https://b.example/os  # fast\n";
        assert_eq!(
            parse_mirrorlist(body),
            vec!["https://a.example/os", "https://b.example/os"]
        );
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("file:///srv/repo/", "/repodata/repomd.xml"), "file:///srv/repo/repodata/repomd.xml");
    }

    #[test]
    fn test_refresh_and_load() {
        let temp = TempDir::new().unwrap();
        let repo_dir = temp.path().join("repo");
        write_repo(&repo_dir, false);

        let sources = sources(
            &temp,
            vec![Repository::new("local", format!("file://{}", repo_dir.display()))],
        );
        let cache = MetadataCache::new(temp.path().join("cache"));
        let client = RepositoryClient::new().unwrap();

        let report = refresh(&client, &sources, &cache).unwrap();
        assert_eq!(report.refreshed, vec!["local"]);
        assert!(report.failed.is_empty());
        assert!(cache.entry("local").is_some());

        let snapshots = load_snapshots(&sources, &cache);
        assert_eq!(snapshots.len(), 1);
        match &snapshots[0].metadata {
            crate::pool::Metadata::Loaded(packages) => {
                assert_eq!(packages.len(), 1);
                assert!(packages[0].location.ends_with("/Packages/foo-1.0-1.noarch.rpm"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_failing_repository_does_not_stop_refresh() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good");
        let bad = temp.path().join("bad");
        write_repo(&good, false);
        write_repo(&bad, true);

        let sources = sources(
            &temp,
            vec![
                Repository::new("good", format!("file://{}", good.display())),
                Repository::new("bad", format!("file://{}", bad.display())),
                Repository::new("gone", "file:///nonexistent/zenit-repo"),
            ],
        );
        let cache = MetadataCache::new(temp.path().join("cache"));
        let report = refresh(&RepositoryClient::new().unwrap(), &sources, &cache).unwrap();

        assert_eq!(report.refreshed, vec!["good"]);
        let failed: Vec<&str> = report.failed.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["bad", "gone"]);

        let snapshots = load_snapshots(&sources, &cache);
        let unavailable = snapshots
            .iter()
            .filter(|s| matches!(s.metadata, crate::pool::Metadata::Unavailable(_)))
            .count();
        assert_eq!(unavailable, 2);
    }

    #[test]
    fn test_mirror_fallback() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("mirror");
        write_repo(&mirror, false);
        let mirrorlist = temp.path().join("mirrorlist");
        fs::write(&mirrorlist, format!("# list\nfile://{}\n", mirror.display())).unwrap();

        let mut repo = Repository::new("main", "file:///nonexistent/zenit-primary");
        repo.mirrorlist = Some(format!("file://{}", mirrorlist.display()));

        let fetched = RepositoryClient::new().unwrap().fetch_metadata(&repo).unwrap();
        assert_eq!(fetched.base_url, format!("file://{}", mirror.display()));
        assert_eq!(fetched.primary, "primary.xml.gz");
    }

    #[test]
    fn test_unsupported_type_aborts_refresh() {
        let temp = TempDir::new().unwrap();
        let mut repo = Repository::new("deb", "file:///nonexistent");
        repo.repo_type = "deb".to_string();
        let sources = sources(&temp, vec![repo]);
        let cache = MetadataCache::new(temp.path().join("cache"));

        let result = refresh(&RepositoryClient::new().unwrap(), &sources, &cache);
        assert!(matches!(result, Err(Error::ConfigError(_))));
        assert!(!temp.path().join("cache").exists());
    }

    #[test]
    fn test_fetch_key_imports_once() {
        use sequoia_openpgp::cert::CertBuilder;
        use sequoia_openpgp::serialize::SerializeInto;

        let temp = TempDir::new().unwrap();
        let (cert, _) = CertBuilder::new()
            .add_userid("Zenit Test <repo@example.org>")
            .add_signing_subkey()
            .generate()
            .unwrap();
        let key_file = temp.path().join("RPM-GPG-KEY-main");
        fs::write(&key_file, cert.armored().to_vec().unwrap()).unwrap();

        let client = RepositoryClient::new().unwrap();
        let verifier = PackageVerifier::new(temp.path().join("keys"));
        let mut repo = Repository::new("main", "file:///nonexistent");
        assert_eq!(fetch_key(&client, &repo, &verifier).unwrap(), None);

        repo.gpgkey = Some(format!("file://{}", key_file.display()));
        let fingerprint = fetch_key(&client, &repo, &verifier).unwrap();
        assert_eq!(fingerprint, Some(cert.fingerprint().to_string()));
        assert!(verifier.has_key("main"));

        // Already in the keyring
        assert_eq!(fetch_key(&client, &repo, &verifier).unwrap(), None);
    }

    #[test]
    fn test_fetch_key_missing_source() {
        let temp = TempDir::new().unwrap();
        let verifier = PackageVerifier::new(temp.path().join("keys"));
        let mut repo = Repository::new("main", "file:///nonexistent");
        repo.gpgkey = Some("file:///nonexistent/RPM-GPG-KEY".to_string());

        let result = fetch_key(&RepositoryClient::new().unwrap(), &repo, &verifier);
        assert!(matches!(result, Err(Error::DownloadError(_))));
        assert!(!verifier.has_key("main"));
    }

    #[test]
    fn test_package_downloader() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("foo-1.0-1.noarch.rpm");
        fs::write(&source, b"rpm bytes").unwrap();
        let client = RepositoryClient::new().unwrap();
        let downloader = PackageDownloader::new(&client, temp.path().join("packages"));

        let path = downloader
            .fetch(&format!("file://{}", source.display()), "foo-1.0-1.noarch.rpm")
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"rpm bytes");
        assert!(!gpg::signature_path(&path).exists());
    }
}
