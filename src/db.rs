//! Local database connections and schema management.
//!
//! The offline core keeps three independently versioned `SQLite` databases:
//! the TTL cache (`cache.db`), the full-object offline store (`offline.db`)
//! and the generic key/value store (`kv.db`). Each database carries its own
//! migration set, selected at open time.
//!
//! Connections are process-wide singletons managed by [`DbHandle`]: the first
//! caller triggers the open and every concurrent caller awaits the same
//! in-flight open rather than racing a second one.
//!
//! # Example
//!
//! ```no_run
//! use maktaba_core::db::{CACHE_MIGRATOR, DbHandle};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = DbHandle::new(Path::new("cache.db"), &CACHE_MIGRATOR);
//! let db = handle.open().await?;
//! // Use db for queries...
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Migration set for the TTL cache database.
pub static CACHE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/cache");

/// Migration set for the full-object offline database.
pub static OFFLINE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/offline");

/// Migration set for the generic offline key/value database.
pub static KV_MIGRATOR: Migrator = sqlx::migrate!("./migrations/kv");

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
/// Connections will wait this long before returning SQLITE_BUSY.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// Record timestamps and expiries are stored in this form. A clock before
/// the epoch degrades to zero rather than panicking.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

/// Database connection wrapper with connection pool.
///
/// Handles SQLite connection pooling, WAL mode configuration,
/// and automatic migration execution.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` and runs the
    /// given migration set.
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode for concurrent reads
    /// 3. Run any pending migrations
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path, migrator), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path, migrator: &Migrator) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        // Enable WAL mode for concurrent reads
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        // Set busy timeout to avoid immediate lock errors
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        migrator.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database with the given migration set.
    ///
    /// The database exists only for the lifetime of the connection
    /// and is useful for unit tests. WAL mode is not enabled for
    /// in-memory databases as it provides no benefit.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(migrator))]
    pub async fn new_in_memory(migrator: &Migrator) -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        migrator.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    ///
    /// Use this for executing queries with sqlx.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Lazily-initialized, process-wide handle to one database.
///
/// [`open`](Self::open) is idempotent: the first successful open is cached
/// and returned to every later caller. Concurrent first-time callers all
/// wait on the same in-flight open (the interior mutex serializes them)
/// instead of each triggering a separate connection.
#[derive(Debug)]
pub struct DbHandle {
    path: PathBuf,
    migrator: &'static Migrator,
    inner: Mutex<Option<Database>>,
}

impl DbHandle {
    /// Creates a handle for the database at `path`. No connection is made
    /// until the first [`open`](Self::open) call.
    #[must_use]
    pub fn new(path: &Path, migrator: &'static Migrator) -> Self {
        Self {
            path: path.to_path_buf(),
            migrator,
            inner: Mutex::new(None),
        }
    }

    /// Returns the shared connection, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the underlying open or migration fails.
    /// A failed open is not cached; the next caller retries.
    pub async fn open(&self) -> Result<Database, DbError> {
        let mut guard = self.inner.lock().await;
        if let Some(db) = guard.as_ref() {
            return Ok(db.clone());
        }
        let db = Database::new(&self.path, self.migrator).await?;
        debug!(path = %self.path.display(), "database opened");
        *guard = Some(db.clone());
        Ok(db)
    }

    /// Closes the shared connection (if open) and deletes the database file.
    ///
    /// Deletion is best-effort: a missing file, or a file still pinned by
    /// another connection, resolves successfully rather than hanging or
    /// surfacing an error. WAL sidecar files are removed alongside.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn drop_database(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(db) = guard.take() {
            db.close().await;
        }
        for path in [
            self.path.clone(),
            self.path.with_extension("db-wal"),
            self.path.with_extension("db-shm"),
        ] {
            if let Err(error) = tokio::fs::remove_file(&path).await
                && error.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), %error, "could not remove database file");
            }
        }
    }
}
