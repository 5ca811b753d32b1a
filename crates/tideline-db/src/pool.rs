//! # Entry Database
//!
//! One SQLite file (or in-memory database) holding the `offline_entries`
//! table for every collection of a process.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Database::new(DbConfig::new("tideline.db"))                            │
//! │       │  open pool, apply migrations                                    │
//! │       ▼                                                                 │
//! │  ┌───────────────────────── SqlitePool ─────────────────────────────┐  │
//! │  │                                                                   │  │
//! │  │  SqliteEntryStore "users"      ──► writer task ──┐                │  │
//! │  │  SqliteEntryStore "orders/eu"  ──► writer task ──┼──► offline_    │  │
//! │  │  SqliteEntryStore "orders/us"  ──► writer task ──┘    entries     │  │
//! │  │                                                                   │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  Writers only ever touch their own collection's rows, so a small pool  │
//! │  is enough; the busy timeout covers the moments two writers overlap.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! File databases run in WAL mode so a store can load its collection while
//! another store's writer is committing.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::entries::EntryRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the entries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    /// Private to one connection; gone when the pool closes.
    Memory,
}

impl fmt::Display for DbLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbLocation::File(path) => write!(f, "{}", path.display()),
            DbLocation::Memory => f.write_str(":memory:"),
        }
    }
}

/// How to open the entry database.
///
/// ```rust,ignore
/// let config = DbConfig::new(dirs.data_dir().join("tideline.db"))
///     .busy_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: DbLocation,

    /// Pool size. Default: 4, always 1 in memory.
    pub max_connections: u32,

    /// How long a statement waits for a lock held by another writer.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// A file database, created along with its parent directories if
    /// missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: DbLocation::File(path.into()),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// A throwaway database for tests and memory-only sessions.
    pub fn in_memory() -> Self {
        DbConfig {
            location: DbLocation::Memory,
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Opens the pool without touching the schema.
    pub fn skip_migrations(mut self) -> Self {
        self.run_migrations = false;
        self
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.location {
            DbLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
                    }
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    // May lose the last commit on power loss, never corrupts
                    .synchronous(SqliteSynchronous::Normal)
            }
            DbLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?,
        };

        Ok(options.busy_timeout(self.busy_timeout))
    }

    fn pool_size(&self) -> u32 {
        match self.location {
            DbLocation::File(_) => self.max_connections,
            DbLocation::Memory => 1,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the entry database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    location: DbLocation,
}

impl Database {
    /// Opens the pool and brings the schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(location = %config.location, "Opening entry database");

        let options = config.connect_options()?;
        let pool_size = config.pool_size();
        debug!(pool_size, busy_timeout = ?config.busy_timeout, "Connecting");

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            // In memory the single connection is the database
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        if config.run_migrations {
            migrations::run_migrations(&pool).await?;
        }

        info!(location = %config.location, pool_size, "Entry database ready");
        Ok(Database {
            pool,
            location: config.location,
        })
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn entries(&self) -> EntryRepository {
        EntryRepository::new(self.pool.clone())
    }

    /// Closes the pool. Close every store first so its writer can drain.
    pub async fn close(&self) {
        info!(location = %self.location, "Closing entry database");
        self.pool.close().await;
    }
}
