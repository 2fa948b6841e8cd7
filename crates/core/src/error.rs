//! Error types for Docket
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! The migration conditions (`MigrationRequired`, `ServerOutdated`) are
//! distinct variants so that bootstrap code can print a specific remediation
//! message for each instead of a generic failure.

use std::io;
use thiserror::Error;

/// Result type alias for Docket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Docket
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error against the backing storage medium
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A primary or association record addressed by id does not exist
    #[error("{}", not_found_message(.id, .message.as_deref()))]
    NotFound {
        /// Identifier that was looked up
        id: String,
        /// Optional context for the lookup
        message: Option<String>,
    },

    /// Insert with an id that already exists in the collection
    #[error("Duplicate key '{id}' in collection '{collection}'")]
    DuplicateKey {
        /// Collection name
        collection: String,
        /// Colliding id
        id: String,
    },

    /// Stored schema is older than the code and migration was not permitted
    #[error("Migration required for {store}: stored schema {from}, running {to}")]
    MigrationRequired {
        /// Store whose data is out of date
        store: String,
        /// Version found on disk
        from: String,
        /// Version the running code expects
        to: String,
    },

    /// Stored schema is newer than the running code understands
    #[error("Server outdated for {store}: stored schema {stored} is newer than {current}")]
    ServerOutdated {
        /// Store whose data is newer than the code
        store: String,
        /// Version found on disk
        stored: String,
        /// Version the running code expects
        current: String,
    },

    /// No converter is registered for a stored record version
    #[error("No migration registered for version {version} in '{collection}'")]
    MigrationGap {
        /// Collection (or chain) being migrated
        collection: String,
        /// Version with no converter
        version: String,
    },

    /// The converter for this version is a stub; an offline tool must run first
    #[error(
        "Version {version} in '{collection}' cannot be migrated in-process; \
         run the offline migration preparation step first"
    )]
    ManualMigrationRequired {
        /// Collection (or chain) being migrated
        collection: String,
        /// Version whose converter is a stub
        version: String,
    },

    /// Record is malformed (missing `id`/`version`, bad field types)
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Filter expression could not be parsed
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

fn not_found_message(id: &str, message: Option<&str>) -> String {
    match message {
        Some(message) => format!("{} (id='{}')", message, id),
        None => format!("Item '{}' not found", id),
    }
}

impl Error {
    /// Not-found error for a bare id
    pub fn not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            id: id.into(),
            message: None,
        }
    }

    /// Not-found error with context
    pub fn not_found_with(id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::NotFound {
            id: id.into(),
            message: Some(message.into()),
        }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for both flavours of unrecoverable chain gap
    pub fn is_migration_gap(&self) -> bool {
        matches!(
            self,
            Error::MigrationGap { .. } | Error::ManualMigrationRequired { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
