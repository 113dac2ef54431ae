// src/repository/cache.rs

//! On-disk metadata cache
//!
//! Layout under the cache root:
//!
//! ```text
//! .lock                    advisory lock file
//! repos/<name>/meta.json   refresh time, base url, primary file name
//! repos/<name>/<primary>   primary metadata as downloaded
//! repos/<name>/.complete   written last; a directory without it is ignored
//! packages/                downloaded artifacts
//! ```
//!
//! Writers hold an exclusive lock and stage each repository in
//! `<name>.new` before swapping it in; the previous copy stays at
//! `<name>.old` until the swap is done. Readers never block on a writer.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOCK_FILE: &str = ".lock";
const META_FILE: &str = "meta.json";
const COMPLETE_MARKER: &str = ".complete";

/// What is known about a cached repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub refreshed_at: DateTime<Utc>,
    /// Base URL the metadata was fetched from (possibly a mirror)
    pub base_url: String,
    /// File name of the primary metadata, including its compression suffix
    pub primary: String,
}

/// Exclusive hold on the cache, released on drop
#[derive(Debug)]
pub struct CacheLock {
    file: File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release metadata cache lock: {}", e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataCache {
    root: PathBuf,
}

fn io_error(what: &str, path: &Path, e: std::io::Error) -> Error {
    Error::IoError(format!("Failed to {} {}: {}", what, path.display(), e))
}

impl MetadataCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where downloaded artifacts are kept
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    fn repo_dir(&self, repo: &str) -> PathBuf {
        self.repos_dir().join(repo)
    }

    fn sibling(&self, repo: &str, suffix: &str) -> PathBuf {
        self.repos_dir().join(format!("{}.{}", repo, suffix))
    }

    fn lock_file(&self) -> Result<File> {
        fs::create_dir_all(&self.root).map_err(|e| io_error("create", &self.root, e))?;
        let path = self.root.join(LOCK_FILE);
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error("open", &path, e))
    }

    /// Take the exclusive write lock, waiting for other writers
    pub fn lock(&self) -> Result<CacheLock> {
        let file = self.lock_file()?;
        debug!("Waiting for metadata cache lock in {}", self.root.display());
        FileExt::lock_exclusive(&file)
            .map_err(|e| io_error("lock", &self.root.join(LOCK_FILE), e))?;
        Ok(CacheLock { file })
    }

    /// Store freshly downloaded metadata for `repo`
    ///
    /// The caller must hold the write lock.
    pub fn store(
        &self,
        _lock: &CacheLock,
        repo: &str,
        entry: &CacheEntry,
        primary: &[u8],
    ) -> Result<()> {
        let staging = self.sibling(repo, "new");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| io_error("clear", &staging, e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| io_error("create", &staging, e))?;

        let primary_path = staging.join(&entry.primary);
        fs::write(&primary_path, primary).map_err(|e| io_error("write", &primary_path, e))?;

        let meta_path = staging.join(META_FILE);
        let meta = serde_json::to_vec_pretty(entry)
            .map_err(|e| Error::IoError(format!("Failed to serialize cache entry: {}", e)))?;
        fs::write(&meta_path, meta).map_err(|e| io_error("write", &meta_path, e))?;

        let marker = staging.join(COMPLETE_MARKER);
        File::create(&marker).map_err(|e| io_error("create", &marker, e))?;

        let current = self.repo_dir(repo);
        let old = self.sibling(repo, "old");
        if old.exists() {
            fs::remove_dir_all(&old).map_err(|e| io_error("clear", &old, e))?;
        }
        if current.exists() {
            fs::rename(&current, &old).map_err(|e| io_error("move", &current, e))?;
        }
        fs::rename(&staging, &current).map_err(|e| io_error("move", &staging, e))?;
        if old.exists() {
            fs::remove_dir_all(&old).map_err(|e| io_error("remove", &old, e))?;
        }

        info!("Cached metadata for {} ({} bytes)", repo, primary.len());
        Ok(())
    }

    /// Drop everything cached for `repo`
    pub fn forget(&self, _lock: &CacheLock, repo: &str) -> Result<()> {
        for dir in [
            self.repo_dir(repo),
            self.sibling(repo, "new"),
            self.sibling(repo, "old"),
        ] {
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| io_error("remove", &dir, e))?;
            }
        }
        Ok(())
    }

    /// The last complete copy of a repository, if any
    fn complete_dir(&self, repo: &str) -> Option<PathBuf> {
        // `.old` only outlives `<name>` in the middle of a swap
        [self.repo_dir(repo), self.sibling(repo, "old")]
            .into_iter()
            .find(|dir| dir.join(COMPLETE_MARKER).is_file())
    }

    fn read_entry(dir: &Path) -> Result<CacheEntry> {
        let path = dir.join(META_FILE);
        let data = fs::read(&path).map_err(|e| io_error("read", &path, e))?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::ParseError(format!("Invalid cache entry {}: {}", path.display(), e)))
    }

    /// Refresh information for `repo`, if it was ever refreshed
    pub fn entry(&self, repo: &str) -> Option<CacheEntry> {
        let dir = self.complete_dir(repo)?;
        match Self::read_entry(&dir) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Cached primary metadata for `repo`
    ///
    /// Never waits for a writer: if one is active, the last complete copy is
    /// read and a warning logged.
    pub fn read(&self, repo: &str) -> Result<Option<(CacheEntry, Vec<u8>)>> {
        let lock = self.lock_file()?;
        let shared = FileExt::try_lock_shared(&lock).is_ok();
        if !shared {
            warn!(
                "Metadata cache is being refreshed; reading last complete copy of {}",
                repo
            );
        }

        let result = match self.complete_dir(repo) {
            None => Ok(None),
            Some(dir) => Self::read_entry(&dir).and_then(|entry| {
                let path = dir.join(&entry.primary);
                let data = fs::read(&path).map_err(|e| io_error("read", &path, e))?;
                Ok(Some((entry, data)))
            }),
        };

        if shared {
            let _ = FileExt::unlock(&lock);
        }
        result
    }
}
