//! SQLite storage with connection pooling
//!
//! Two pools share one database file:
//! - Writer pool: a single connection, so every write (and every
//!   delete-then-insert supersession) is serialized
//! - Reader pool: several connections for queries, which WAL mode lets run
//!   alongside the writer

use crate::error::Result;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::info;

const SCHEMA: &str = include_str!("schema.sql");

const PRAGMAS: &str = "PRAGMA busy_timeout = 5000;
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;";

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Maximum number of reader connections
    pub max_reader_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("nostr-pool.db"),
            max_reader_connections: 8,
        }
    }
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Connection pool wrapper managing the writer and reader pools
pub struct ConnectionPool {
    writer: Pool<SqliteConnectionManager>,
    reader: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let manager = || {
            SqliteConnectionManager::file(&config.path)
                .with_init(|conn: &mut Connection| conn.execute_batch(PRAGMAS))
        };

        let writer = Pool::builder().max_size(1).build(manager())?;
        let reader = Pool::builder()
            .max_size(config.max_reader_connections.max(1))
            .build(manager())?;

        Ok(Self { writer, reader })
    }

    /// Get the writer connection
    pub fn writer(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.writer.get()?)
    }

    /// Get a reader connection
    pub fn reader(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.reader.get()?)
    }
}

/// The local event store.
///
/// Cheap to share behind an `Arc`; every method checks a connection out of the
/// pool for the duration of the call.
pub struct Store {
    pool: ConnectionPool,
    path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the database and apply the schema.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::new(&config)?;
        pool.writer()?.execute_batch(SCHEMA)?;

        info!("Event store opened at {:?}", config.path);

        Ok(Self {
            pool,
            path: config.path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub(crate) fn writer(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.writer()
    }

    pub(crate) fn reader(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.reader()
    }
}
