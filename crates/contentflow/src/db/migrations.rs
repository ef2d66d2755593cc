//! Schema versioning through SQLite's `user_version` pragma. Each pending
//! script runs in its own transaction together with the version bump.

use rusqlite::Connection;

use super::error::DatabaseError;

/// `(version, name, script)`, ascending.
const SCRIPTS: &[(u32, &str, &str)] = &[
    (1, "queues", include_str!("sql/001_queues.sql")),
    (2, "processes", include_str!("sql/002_processes.sql")),
];

pub fn latest_version() -> u32 {
    SCRIPTS.last().map(|(v, _, _)| *v).unwrap_or(0)
}

pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |r| r.get(0))?)
}

/// Brings the schema up to [`latest_version`]. Returns how many scripts ran.
pub fn migrate(conn: &mut Connection) -> Result<usize, DatabaseError> {
    let current = schema_version(conn)?;
    let supported = latest_version();
    if current > supported {
        return Err(DatabaseError::SchemaTooNew {
            found: current,
            supported,
        });
    }

    let mut applied = 0;
    for &(version, name, script) in SCRIPTS.iter().filter(|(v, _, _)| *v > current) {
        let wrap = |source| DatabaseError::Migration {
            version,
            name,
            source,
        };
        let tx = conn.transaction().map_err(wrap)?;
        tx.execute_batch(script).map_err(wrap)?;
        tx.pragma_update(None, "user_version", version).map_err(wrap)?;
        tx.commit().map_err(wrap)?;

        log::info!("Database schema upgraded to v{} ({})", version, name);
        applied += 1;
    }
    Ok(applied)
}
