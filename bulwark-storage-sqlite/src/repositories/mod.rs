//! Repository implementations for SQLite storage

pub mod incident;
pub mod user;

pub use incident::SqliteIncidentRepository;
pub use user::SqliteUserRepository;

use async_trait::async_trait;
use bulwark_core::{
    Error,
    error::StorageError,
    repositories::{IncidentRepositoryProvider, RepositoryProvider, UserRepositoryProvider},
};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::migrations::{SqliteMigrationManager, all_migrations};

/// Repository provider implementation for SQLite
///
/// Hands out shared handles to every repository over one connection pool.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    user: Arc<SqliteUserRepository>,
    incident: Arc<SqliteIncidentRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let user = Arc::new(SqliteUserRepository::new(pool.clone()));
        let incident = Arc::new(SqliteIncidentRepository::new(pool.clone()));

        Self {
            pool,
            user,
            incident,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl UserRepositoryProvider for SqliteRepositoryProvider {
    type UserRepo = SqliteUserRepository;

    fn user(&self) -> Arc<Self::UserRepo> {
        Arc::clone(&self.user)
    }
}

impl IncidentRepositoryProvider for SqliteRepositoryProvider {
    type IncidentRepo = SqliteIncidentRepository;

    fn incident(&self) -> Arc<Self::IncidentRepo> {
        Arc::clone(&self.incident)
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        use bulwark_migration::MigrationManager;

        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&all_migrations()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn setup_test_db() -> SqlitePool {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");
        SqliteRepositoryProvider::new(pool.clone())
            .migrate()
            .await
            .expect("Failed to run migrations");

        pool
    }

    #[tokio::test]
    async fn test_health_check() {
        let pool = setup_test_db().await;
        let provider = SqliteRepositoryProvider::new(pool);
        provider.health_check().await.expect("Health check failed");
    }

    #[tokio::test]
    async fn test_migrate_twice_is_noop() {
        let pool = setup_test_db().await;
        let provider = SqliteRepositoryProvider::new(pool);
        provider.migrate().await.expect("Second migrate failed");
    }
}
