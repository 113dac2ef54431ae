// src/error.rs

use crate::resolver::Problems;
use thiserror::Error;

/// Core error types for Zenit
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Malformed repository configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Metadata of a single repository is missing or corrupt
    #[error("Metadata for repository '{repo}' unavailable: {reason}")]
    MetadataError { repo: String, reason: String },

    /// Malformed input (metadata, versions, dependency strings)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A named entity does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// A named entity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Resolution failed: some dependency cannot be satisfied
    #[error("Unsatisfiable dependencies:\n{0}")]
    Unsatisfiable(Problems),

    /// Resolution failed because of conflicting packages
    #[error("Conflicting packages:\n{0}")]
    Conflict(Problems),

    /// Network or transport failure
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Downloaded content does not match the expected checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Package signature or header verification failed
    #[error("Verification failed: {0}")]
    VerificationError(String),

    /// The system installer reported a failure
    #[error("Install error: {0}")]
    InstallError(String),
}

impl Error {
    /// Resolution problems carried by this error, if any
    pub fn problems(&self) -> Option<&Problems> {
        match self {
            Error::Unsatisfiable(problems) | Error::Conflict(problems) => Some(problems),
            _ => None,
        }
    }
}

/// Result type alias using Zenit's Error type
pub type Result<T> = std::result::Result<T, Error>;
