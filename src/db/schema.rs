// src/db/schema.rs

//! Database schema definitions and migrations
//!
//! The database holds the installed package set (with the relations the
//! resolver needs) and the history of executed transactions.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// - installed_packages: one row per installed NEVRA
/// - package_relations: provides/requires/conflicts/obsoletes of those rows
/// - changesets: one row per executed transaction
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE changesets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'applied', 'partial')),
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            applied_at TEXT
        );

        CREATE INDEX idx_changesets_status ON changesets(status);

        CREATE TABLE installed_packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nevra TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            epoch INTEGER NOT NULL DEFAULT 0,
            version TEXT NOT NULL,
            release TEXT,
            arch TEXT NOT NULL,
            repo_origin TEXT,
            summary TEXT,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            installed_by_changeset_id INTEGER,
            FOREIGN KEY (installed_by_changeset_id) REFERENCES changesets(id)
        );

        CREATE INDEX idx_installed_packages_name ON installed_packages(name);

        CREATE TABLE package_relations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('provides', 'requires', 'conflicts', 'obsoletes')),
            name TEXT NOT NULL,
            operator TEXT,
            epoch INTEGER,
            version TEXT,
            release TEXT,
            optional INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (package_id) REFERENCES installed_packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_package_relations_package ON package_relations(package_id);
        CREATE INDEX idx_package_relations_name ON package_relations(kind, name);
        ",
    )?;

    Ok(())
}

/// Schema Version 2: per-step transaction history
///
/// Records what happened to every step of a changeset so a partially
/// applied transaction can be inspected afterwards.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE changeset_steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            changeset_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            action TEXT NOT NULL CHECK(action IN ('install', 'erase')),
            nevra TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('applied', 'failed', 'skipped')),
            error TEXT,
            UNIQUE(changeset_id, position),
            FOREIGN KEY (changeset_id) REFERENCES changesets(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_changeset_steps_changeset ON changeset_steps(changeset_id);
        ",
    )?;

    Ok(())
}
