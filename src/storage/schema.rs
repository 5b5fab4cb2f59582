//! Connection pragmas and schema version bookkeeping.

use rusqlite::Connection;
use std::time::Duration;

/// Largest version `PRAGMA user_version` can hold.
pub const MAX_SCHEMA_VERSION: u32 = i32::MAX as u32;

/// How long a connection waits on a locked database before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply pragmas for the single write connection.
pub fn apply_writer_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        PRAGMA synchronous = NORMAL;
        "#,
    )
}

/// Apply pragmas for pooled read-only connections.
pub fn apply_reader_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

/// Switch the database to write-ahead logging.
///
/// Returns whether WAL is active afterwards. In-memory databases and
/// filesystems without shared memory support stay in their old mode.
pub fn enable_write_ahead_log(conn: &Connection) -> rusqlite::Result<bool> {
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(mode.eq_ignore_ascii_case("wal"))
}

/// Read the persisted schema version.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Persist the schema version.
///
/// Part of the surrounding transaction, so a rollback restores the old value.
/// `user_version` is a signed 32-bit integer; versions above [`MAX_SCHEMA_VERSION`]
/// are rejected instead of silently reading back as 0.
pub fn set_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    if version > MAX_SCHEMA_VERSION {
        return Err(rusqlite::Error::IntegralValueOutOfRange(0, i64::from(version)));
    }
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
}
