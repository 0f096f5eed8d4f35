//! Schema migration primitives shared by bulwark storage backends.
//!
//! A backend declares its schema as an ordered list of [`Migration`]s and
//! applies them through a [`MigrationManager`], which records every applied
//! version in a bookkeeping table so repeated runs are no-ops.

use async_trait::async_trait;
use sqlx::Database;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

/// A single, reversible schema change.
#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    /// Apply the change inside the manager's transaction
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Revert the change
    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Monotonic version used for ordering and bookkeeping
    fn version(&self) -> i64;

    /// Human readable name, stored alongside the version
    fn name(&self) -> &str;
}

/// Row of the bookkeeping table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// Unix seconds; sqlite has no native timestamp type
    pub applied_at: i64,
}

#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        "_bulwark_migrations"
    }

    /// Create the bookkeeping table if it does not exist
    async fn initialize(&self) -> Result<()>;

    /// Apply every migration that has not been applied yet, in order
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Revert every applied migration, newest first
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    async fn is_applied(&self, version: i64) -> Result<bool>;

    /// Highest applied version, if any
    async fn current_version(&self) -> Result<Option<i64>> {
        Ok(self
            .get_applied_migrations()
            .await?
            .iter()
            .map(|record| record.version)
            .max())
    }
}
