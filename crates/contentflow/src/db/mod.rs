//! SQLite persistence shared by the queue transport and the process records.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

pub mod error;
pub mod migrations;
pub mod process_repo;

pub use error::DatabaseError;
pub use process_repo::{ProcessFilter, ProcessRecord, ProcessResultUpdate, ProcessStatus};

/// How long a writer waits for another process's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle to one connection. Worker processes each open their own
/// handle on the same file.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the file at `path`, creating parent directories, and upgrades
    /// the schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get::<_, String>(0))?;
        let db = Self::prepare(conn)?;
        log::info!("Opened database {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(mut conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let guard = self.lock()?;
        f(&guard)
    }

    /// For closures that open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DatabaseError>,
    {
        let mut guard = self.lock()?;
        f(&mut guard)
    }
}

/// `~/.contentflow/contentflow.db`
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".contentflow").join("contentflow.db"))
}
