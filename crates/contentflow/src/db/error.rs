use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema version {version} ({name}) failed: {source}")]
    Migration {
        version: u32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// The database file was written by a newer build.
    #[error("Database schema version {found} is newer than the supported {supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("Another thread panicked while holding the database connection")]
    Poisoned,
}
