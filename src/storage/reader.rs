//! Read connection pool for the concurrent task pool.
//!
//! Uses r2d2 with r2d2_sqlite for pooled read access.
//! Only built when the database runs in WAL mode, which lets readers
//! proceed while the writer holds its transaction.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::path::Path;

use super::schema::apply_reader_pragmas;
use super::StorageError;

/// Pool of read-only connections.
#[derive(Clone)]
pub struct ReaderPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ReaderPool {
    /// Create a new reader pool for the given database path.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    /// * `max_size` - Maximum number of connections in the pool
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub fn new<P: AsRef<Path>>(db_path: P, max_size: u32) -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);

        let pool = Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(ReaderConnectionCustomizer))
            .build(manager)?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        Ok(self.pool.get()?)
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }
}

/// Connection customizer that applies reader pragmas.
#[derive(Debug)]
struct ReaderConnectionCustomizer;

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for ReaderConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_reader_pragmas(conn)
    }
}
