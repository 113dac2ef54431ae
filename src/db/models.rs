// src/db/models.rs

//! Data models for the installed-state database
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::{Error, Result};
use crate::packages::{Capability, Dependency, INSTALLED_REPO, Nevra, Operator, Package};
use crate::transaction::{Step, StepKind};
use crate::version::RpmVersion;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::debug;

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// An installed package
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub id: Option<i64>,
    pub nevra: Nevra,
    /// Repository the package was installed from
    pub repo_origin: Option<String>,
    pub summary: Option<String>,
    pub installed_at: Option<String>,
    pub installed_by_changeset_id: Option<i64>,
}

const INSTALLED_COLUMNS: &str =
    "id, name, epoch, version, release, arch, repo_origin, summary, installed_at, installed_by_changeset_id";

impl InstalledPackage {
    /// Record for a package that has just been installed
    pub fn from_package(package: &Package, changeset_id: Option<i64>) -> Self {
        Self {
            id: None,
            nevra: package.nevra.clone(),
            repo_origin: (!package.is_installed()).then(|| package.repo.clone()),
            summary: (!package.summary.is_empty()).then(|| package.summary.clone()),
            installed_at: None,
            installed_by_changeset_id: changeset_id,
        }
    }

    /// Insert this package and its relations
    pub fn insert(&mut self, conn: &Connection, package: &Package) -> Result<i64> {
        conn.execute(
            "INSERT INTO installed_packages
                (nevra, name, epoch, version, release, arch, repo_origin, summary, installed_by_changeset_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.nevra.key(),
                &self.nevra.name,
                self.nevra.evr.epoch as i64,
                &self.nevra.evr.version,
                &self.nevra.evr.release,
                &self.nevra.arch,
                &self.repo_origin,
                &self.summary,
                &self.installed_by_changeset_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);

        for cap in &package.provides {
            RelationEntry::from_capability(id, cap).insert(conn)?;
        }
        for (kind, deps) in [
            (RelationKind::Requires, &package.requires),
            (RelationKind::Conflicts, &package.conflicts),
            (RelationKind::Obsoletes, &package.obsoletes),
        ] {
            for dep in deps {
                RelationEntry::from_dependency(id, kind, dep).insert(conn)?;
            }
        }
        Ok(id)
    }

    pub fn find_by_nevra(conn: &Connection, nevra: &Nevra) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM installed_packages WHERE nevra = ?1",
            INSTALLED_COLUMNS
        ))?;
        let pkg = stmt.query_row([nevra.key()], Self::from_row).optional()?;
        Ok(pkg)
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM installed_packages WHERE name = ?1",
            INSTALLED_COLUMNS
        ))?;
        let pkgs = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pkgs)
    }

    /// List all installed packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM installed_packages ORDER BY name, arch",
            INSTALLED_COLUMNS
        ))?;
        let pkgs = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pkgs)
    }

    /// Delete an installed package; relations go with it
    pub fn delete(conn: &Connection, nevra: &Nevra) -> Result<bool> {
        let count = conn.execute(
            "DELETE FROM installed_packages WHERE nevra = ?1",
            [nevra.key()],
        )?;
        Ok(count > 0)
    }

    /// Rebuild the full package record, relations included
    pub fn to_package(&self, conn: &Connection) -> Result<Package> {
        let id = self
            .id
            .ok_or_else(|| Error::NotFoundError(format!("{} has no database id", self.nevra)))?;

        let mut pkg = Package::new(
            self.nevra.name.clone(),
            self.nevra.evr.clone(),
            self.nevra.arch.clone(),
        );
        pkg.repo = INSTALLED_REPO.to_string();
        pkg.summary = self.summary.clone().unwrap_or_default();

        for entry in RelationEntry::find_by_package(conn, id)? {
            match entry.kind {
                RelationKind::Provides => pkg.provides.push(entry.to_capability()),
                RelationKind::Requires => pkg.requires.push(entry.to_dependency()),
                RelationKind::Conflicts => pkg.conflicts.push(entry.to_dependency()),
                RelationKind::Obsoletes => pkg.obsoletes.push(entry.to_dependency()),
            }
        }
        Ok(pkg)
    }

    /// Every installed package as a full record
    pub fn load_all(conn: &Connection) -> Result<Vec<Package>> {
        Self::list_all(conn)?
            .iter()
            .map(|pkg| pkg.to_package(conn))
            .collect()
    }

    /// Bring the table in line with the packages the system reports
    ///
    /// Rows for packages no longer installed are dropped. Packages missing
    /// from the table are added without an origin. Rows that match keep
    /// their origin and changeset. Returns `(added, removed)`.
    pub fn sync(conn: &Connection, system: &[Package]) -> Result<(usize, usize)> {
        let present: HashSet<String> = system.iter().map(|pkg| pkg.nevra.key()).collect();
        let mut known = HashSet::new();
        let mut removed = 0;

        for record in Self::list_all(conn)? {
            let key = record.nevra.key();
            if present.contains(&key) {
                known.insert(key);
            } else if Self::delete(conn, &record.nevra)? {
                debug!("{} is no longer installed", record.nevra);
                removed += 1;
            }
        }

        let mut added = 0;
        for pkg in system.iter() {
            if known.contains(&pkg.nevra.key()) {
                continue;
            }
            debug!("Recording {} from the rpm database", pkg.nevra);
            let mut record = Self::from_package(pkg, None);
            record.repo_origin = None;
            record.insert(conn, pkg)?;
            known.insert(pkg.nevra.key());
            added += 1;
        }
        Ok((added, removed))
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let epoch: i64 = row.get(2)?;
        let epoch = u64::try_from(epoch).map_err(|_| invalid_column(2, format!("negative epoch {}", epoch)))?;
        let evr = RpmVersion::new(epoch, row.get::<_, String>(3)?, row.get(4)?);

        Ok(Self {
            id: Some(row.get(0)?),
            nevra: Nevra::new(row.get::<_, String>(1)?, evr, row.get::<_, String>(5)?),
            repo_origin: row.get(6)?,
            summary: row.get(7)?,
            installed_at: row.get(8)?,
            installed_by_changeset_id: row.get(9)?,
        })
    }
}

/// Which list a relation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Provides,
    Requires,
    Conflicts,
    Obsoletes,
}

impl RelationKind {
    pub fn as_str(&self) -> &str {
        match self {
            RelationKind::Provides => "provides",
            RelationKind::Requires => "requires",
            RelationKind::Conflicts => "conflicts",
            RelationKind::Obsoletes => "obsoletes",
        }
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "provides" => Ok(RelationKind::Provides),
            "requires" => Ok(RelationKind::Requires),
            "conflicts" => Ok(RelationKind::Conflicts),
            "obsoletes" => Ok(RelationKind::Obsoletes),
            _ => Err(format!("Invalid relation kind: {}", s)),
        }
    }
}

/// One provides/requires/conflicts/obsoletes row
#[derive(Debug, Clone)]
pub struct RelationEntry {
    pub package_id: i64,
    pub kind: RelationKind,
    pub name: String,
    pub operator: Option<Operator>,
    pub version: Option<RpmVersion>,
    pub optional: bool,
}

impl RelationEntry {
    fn from_capability(package_id: i64, cap: &Capability) -> Self {
        Self {
            package_id,
            kind: RelationKind::Provides,
            name: cap.name.clone(),
            operator: None,
            version: cap.version.clone(),
            optional: false,
        }
    }

    fn from_dependency(package_id: i64, kind: RelationKind, dep: &Dependency) -> Self {
        Self {
            package_id,
            kind,
            name: dep.name.clone(),
            operator: dep.constraint.as_ref().map(|(op, _)| *op),
            version: dep.constraint.as_ref().map(|(_, v)| v.clone()),
            optional: dep.optional,
        }
    }

    fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO package_relations (package_id, kind, name, operator, epoch, version, release, optional)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.package_id,
                self.kind.as_str(),
                &self.name,
                self.operator.map(|op| op.to_rpm_flags()),
                self.version.as_ref().map(|v| v.epoch as i64),
                self.version.as_ref().map(|v| v.version.clone()),
                self.version.as_ref().and_then(|v| v.release.clone()),
                self.optional,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT package_id, kind, name, operator, epoch, version, release, optional
             FROM package_relations WHERE package_id = ?1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn to_capability(&self) -> Capability {
        match &self.version {
            Some(version) => Capability::versioned(self.name.clone(), version.clone()),
            None => Capability::new(self.name.clone()),
        }
    }

    fn to_dependency(&self) -> Dependency {
        let dep = match (self.operator, &self.version) {
            (Some(op), Some(version)) => Dependency::versioned(self.name.clone(), op, version.clone()),
            _ => Dependency::new(self.name.clone()),
        };
        if self.optional { dep.into_optional() } else { dep }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(1)?;
        let kind = kind_str
            .parse::<RelationKind>()
            .map_err(|e| invalid_column(1, e))?;

        let operator = match row.get::<_, Option<String>>(3)? {
            Some(flags) => Some(
                Operator::from_rpm_flags(&flags)
                    .ok_or_else(|| invalid_column(3, format!("Invalid operator: {}", flags)))?,
            ),
            None => None,
        };
        let epoch: Option<i64> = row.get(4)?;
        let version = match row.get::<_, Option<String>>(5)? {
            Some(ver) => Some(RpmVersion::new(
                epoch.unwrap_or(0).max(0) as u64,
                ver,
                row.get(6)?,
            )),
            None => None,
        };

        Ok(Self {
            package_id: row.get(0)?,
            kind,
            name: row.get(2)?,
            operator,
            version,
            optional: row.get(7)?,
        })
    }
}

/// Changeset status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetStatus {
    Pending,
    Applied,
    /// Execution stopped at a failing step
    Partial,
}

impl ChangesetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChangesetStatus::Pending => "pending",
            ChangesetStatus::Applied => "applied",
            ChangesetStatus::Partial => "partial",
        }
    }
}

impl FromStr for ChangesetStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangesetStatus::Pending),
            "applied" => Ok(ChangesetStatus::Applied),
            "partial" => Ok(ChangesetStatus::Partial),
            _ => Err(format!("Invalid changeset status: {}", s)),
        }
    }
}

/// A Changeset records one executed transaction
#[derive(Debug, Clone)]
pub struct Changeset {
    pub id: Option<i64>,
    pub description: String,
    pub status: ChangesetStatus,
    pub created_at: Option<String>,
    pub applied_at: Option<String>,
}

impl Changeset {
    /// Create a new Changeset
    pub fn new(description: String) -> Self {
        Self {
            id: None,
            description,
            status: ChangesetStatus::Pending,
            created_at: None,
            applied_at: None,
        }
    }

    /// Insert this changeset into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO changesets (description, status) VALUES (?1, ?2)",
            params![&self.description, self.status.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a changeset by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description, status, created_at, applied_at FROM changesets WHERE id = ?1",
        )?;
        let changeset = stmt.query_row([id], Self::from_row).optional()?;
        Ok(changeset)
    }

    /// List all changesets, newest first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description, status, created_at, applied_at
             FROM changesets ORDER BY id DESC",
        )?;
        let changesets = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(changesets)
    }

    /// Update changeset status
    pub fn update_status(&mut self, conn: &Connection, new_status: ChangesetStatus) -> Result<()> {
        let id = self.id.ok_or_else(|| {
            Error::NotFoundError("Cannot update changeset without ID".to_string())
        })?;

        if new_status == ChangesetStatus::Pending {
            conn.execute(
                "UPDATE changesets SET status = ?1 WHERE id = ?2",
                params![new_status.as_str(), id],
            )?;
        } else {
            conn.execute(
                "UPDATE changesets SET status = ?1, applied_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![new_status.as_str(), id],
            )?;
        }

        self.status = new_status;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(2)?;
        let status = status_str
            .parse::<ChangesetStatus>()
            .map_err(|e| invalid_column(2, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            description: row.get(1)?,
            status,
            created_at: row.get(3)?,
            applied_at: row.get(4)?,
        })
    }
}

/// What happened to one step of a changeset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Applied,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StepStatus::Applied => "applied",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "applied" => Ok(StepStatus::Applied),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            _ => Err(format!("Invalid step status: {}", s)),
        }
    }
}

/// A recorded transaction step
#[derive(Debug, Clone)]
pub struct ChangesetStep {
    pub changeset_id: i64,
    pub position: i64,
    pub action: String,
    pub nevra: String,
    pub status: StepStatus,
    pub error: Option<String>,
}

impl ChangesetStep {
    pub fn new(changeset_id: i64, position: usize, step: &Step, status: StepStatus) -> Self {
        Self {
            changeset_id,
            position: position as i64,
            action: step.kind.as_str().to_string(),
            nevra: step.package.nevra.to_string(),
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO changeset_steps (changeset_id, position, action, nevra, status, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.changeset_id,
                self.position,
                &self.action,
                &self.nevra,
                self.status.as_str(),
                &self.error,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_changeset(conn: &Connection, changeset_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT changeset_id, position, action, nevra, status, error
             FROM changeset_steps WHERE changeset_id = ?1 ORDER BY position",
        )?;
        let steps = stmt
            .query_map([changeset_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(steps)
    }

    pub fn is_install(&self) -> bool {
        self.action == StepKind::Install.as_str()
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(4)?;
        let status = status_str
            .parse::<StepStatus>()
            .map_err(|e| invalid_column(4, e))?;

        Ok(Self {
            changeset_id: row.get(0)?,
            position: row.get(1)?,
            action: row.get(2)?,
            nevra: row.get(3)?,
            status,
            error: row.get(5)?,
        })
    }
}
