//! SQLite storage backend for bulwark
//!
//! Provides the durable half of bulwark's state: lock columns on the `users`
//! table and the `security_incidents` log. Attempt counters are not stored
//! here; they stay in the process.
//!
//! ```rust,no_run
//! use bulwark_storage_sqlite::SqliteStorage;
//! use bulwark_core::repositories::RepositoryProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = SqliteStorage::connect("sqlite://bulwark.db?mode=rwc").await?;
//! let provider = storage.into_repository_provider();
//! provider.migrate().await?;
//! # Ok(())
//! # }
//! ```

pub mod migrations;
pub mod repositories;

pub use repositories::{SqliteIncidentRepository, SqliteRepositoryProvider, SqliteUserRepository};

use bulwark_core::{Error, error::StorageError};
use sqlx::SqlitePool;

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url`, e.g. `sqlite::memory:` or `sqlite://path/to/db.sqlite`.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let pool = SqlitePool::connect(url).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            Error::Storage(StorageError::Connection(e.to_string()))
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn into_repository_provider(self) -> SqliteRepositoryProvider {
        SqliteRepositoryProvider::new(self.pool)
    }
}
