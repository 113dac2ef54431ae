// src/session.rs

//! One invocation's view of the system
//!
//! A [`Session`] loads the repository list, the cached metadata and the
//! installed packages, builds the [`Pool`] from them, and records executed
//! transactions back into the database.
//!
//! The system rpm database decides what is installed. The state database
//! mirrors it on every open and keeps what rpm does not know: the
//! repository each package came from and the transaction history.

use crate::db;
use crate::db::models::{Changeset, ChangesetStatus, ChangesetStep, InstalledPackage, StepStatus};
use crate::error::{Error, Result};
use crate::installer::RpmInstaller;
use crate::packages::rpmdb::RpmDatabase;
use crate::pool::Pool;
use crate::repository::config::DEFAULT_SOURCES_PATH;
use crate::repository::{
    self, MetadataCache, PackageDownloader, PackageVerifier, RefreshReport, RepositoryClient,
    SourcesList, load_snapshots,
};
use crate::resolver::{Job, Resolver, SolverOptions};
use crate::transaction::{
    Downloader, ExecutionReport, Executor, Installer, Step, StepKind, Transaction, Verifier,
};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub const DEFAULT_CACHE_DIR: &str = "/var/cache/zenit";
pub const DEFAULT_DB_PATH: &str = "/var/lib/zenit/zenit.db";
pub const DEFAULT_KEYRING_DIR: &str = "/etc/zenit/keys";

/// Filesystem locations used by a session
#[derive(Debug, Clone)]
pub struct Paths {
    pub sources: PathBuf,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub keyring_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            sources: PathBuf::from(DEFAULT_SOURCES_PATH),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            keyring_dir: PathBuf::from(DEFAULT_KEYRING_DIR),
        }
    }
}

/// Where a session learns which packages are installed
#[derive(Debug, Clone)]
pub enum InstalledSource {
    /// Query `rpm -qa` and mirror the result into the state database
    Rpm(RpmDatabase),
    /// Use the state database as it is
    StateDatabase,
}

impl Default for InstalledSource {
    fn default() -> Self {
        InstalledSource::Rpm(RpmDatabase::new())
    }
}

/// Refresh metadata for every enabled repository and fetch missing
/// signing keys
///
/// A key that cannot be fetched is only logged; packages from that
/// repository then fail verification at install time.
pub fn refresh_metadata(paths: &Paths) -> Result<RefreshReport> {
    let sources = SourcesList::load(&paths.sources)?;
    let cache = MetadataCache::new(&paths.cache_dir);
    let client = RepositoryClient::new()?;
    let report = repository::refresh(&client, &sources, &cache)?;

    let verifier = PackageVerifier::new(&paths.keyring_dir);
    for repo in sources.enabled().filter(|repo| repo.gpgcheck) {
        match repository::fetch_key(&client, repo, &verifier) {
            Ok(Some(fingerprint)) => info!("Imported key {} for {}", fingerprint, repo.name),
            Ok(None) => {}
            Err(e) => warn!("Signing key for {} not imported: {}", repo.name, e),
        }
    }
    Ok(report)
}

pub struct Session {
    paths: Paths,
    sources: SourcesList,
    cache: MetadataCache,
    conn: Connection,
    pool: Pool,
}

impl Session {
    /// Load configuration, metadata and installed state, and build the pool
    ///
    /// A malformed repository list fails here, before anything else is read.
    pub fn open(paths: Paths) -> Result<Self> {
        Self::open_with(paths, InstalledSource::default())
    }

    /// Refresh repository metadata, then open
    pub fn open_refreshed(paths: Paths, source: InstalledSource) -> Result<(Self, RefreshReport)> {
        let report = refresh_metadata(&paths)?;
        for (name, error) in &report.failed {
            warn!("Using cached metadata for {}: {}", name, error);
        }
        Ok((Self::open_with(paths, source)?, report))
    }

    /// Open, reading the installed set from `source`
    ///
    /// Without an `rpm` executable the state database is used as it is.
    pub fn open_with(paths: Paths, source: InstalledSource) -> Result<Self> {
        let sources = SourcesList::load(&paths.sources)?;
        let cache = MetadataCache::new(&paths.cache_dir);
        let mut conn = db::open_or_init(&paths.db_path)?;

        let installed = match source {
            InstalledSource::Rpm(rpmdb) => match rpmdb.installed() {
                Ok(system) => {
                    let (added, removed) =
                        db::transaction(&mut conn, |tx| InstalledPackage::sync(tx, &system))?;
                    if added + removed > 0 {
                        info!("State database synced with rpm: {} added, {} removed", added, removed);
                    }
                    system
                }
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("rpm not found; using the state database for installed packages");
                    InstalledPackage::load_all(&conn)?
                }
                Err(e) => return Err(e),
            },
            InstalledSource::StateDatabase => InstalledPackage::load_all(&conn)?,
        };
        let snapshots = load_snapshots(&sources, &cache);
        let pool = Pool::build(snapshots, installed);
        info!(
            "Pool ready: {} packages, {} installed",
            pool.len(),
            pool.installed().len()
        );

        Ok(Self {
            paths,
            sources,
            cache,
            conn,
            pool,
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn sources(&self) -> &SourcesList {
        &self.sources
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Resolve a job and order the result
    pub fn plan(&self, job: &Job, options: SolverOptions) -> Result<Transaction> {
        debug!("Planning {}", job);
        let solution = Resolver::with_options(&self.pool, options).resolve(job)?;
        Transaction::build(&self.pool, &solution)
    }

    /// Execute with the system downloader, verifier and `rpm`
    pub fn apply(&mut self, transaction: &Transaction, description: &str) -> Result<ExecutionReport> {
        let client = RepositoryClient::new()?;
        let downloader = PackageDownloader::new(&client, self.cache.packages_dir());
        let verifier = PackageVerifier::new(&self.paths.keyring_dir);
        let installer = RpmInstaller::new();
        self.execute(transaction, description, &downloader, &verifier, &installer)
    }

    /// Execute a transaction and record it as a changeset
    ///
    /// Every applied step updates the installed-package table right away,
    /// so a halted transaction leaves the database matching the system.
    pub fn execute<D, V, I>(
        &mut self,
        transaction: &Transaction,
        description: &str,
        downloader: &D,
        verifier: &V,
        installer: &I,
    ) -> Result<ExecutionReport>
    where
        D: Downloader + Sync,
        V: Verifier,
        I: Installer,
    {
        let mut changeset = Changeset::new(description.to_string());
        let changeset_id = changeset.insert(&self.conn)?;

        let conn = &mut self.conn;
        let report = Executor::new(downloader, verifier, installer)
            .execute(transaction, |step| record_step(conn, step, changeset_id));

        db::transaction(&mut self.conn, |tx| {
            let mut position = 0;
            for step in &report.completed {
                ChangesetStep::new(changeset_id, position, step, StepStatus::Applied).insert(tx)?;
                position += 1;
            }
            if let Some(failed) = &report.failed {
                ChangesetStep::new(changeset_id, position, &failed.step, StepStatus::Failed)
                    .with_error(failed.error.to_string())
                    .insert(tx)?;
                position += 1;
            }
            for step in &report.remaining {
                ChangesetStep::new(changeset_id, position, step, StepStatus::Skipped).insert(tx)?;
                position += 1;
            }
            let status = if report.is_success() {
                ChangesetStatus::Applied
            } else {
                ChangesetStatus::Partial
            };
            changeset.update_status(tx, status)
        })?;

        Ok(report)
    }

    /// Installed packages as recorded in the database, which mirrors the
    /// rpm database as of [`Session::open`]
    pub fn installed(&self) -> Result<Vec<InstalledPackage>> {
        InstalledPackage::list_all(&self.conn)
    }

    /// Executed transactions, newest first, with their steps
    pub fn history(&self) -> Result<Vec<(Changeset, Vec<ChangesetStep>)>> {
        Changeset::list_all(&self.conn)?
            .into_iter()
            .map(|changeset| {
                let steps = match changeset.id {
                    Some(id) => ChangesetStep::find_by_changeset(&self.conn, id)?,
                    None => Vec::new(),
                };
                Ok((changeset, steps))
            })
            .collect()
    }
}

/// Mirror one applied step into the installed-package table
fn record_step(conn: &mut Connection, step: &Step, changeset_id: i64) -> Result<()> {
    db::transaction(conn, |tx| {
        match step.kind {
            StepKind::Install => {
                // Reinstalling the same NEVRA replaces its record
                InstalledPackage::delete(tx, &step.package.nevra)?;
                InstalledPackage::from_package(&step.package, Some(changeset_id))
                    .insert(tx, &step.package)?;
            }
            StepKind::Erase => {
                if !InstalledPackage::delete(tx, &step.package.nevra)? {
                    warn!("{} was not in the database", step.package.nevra);
                }
            }
        }
        Ok(())
    })
}
