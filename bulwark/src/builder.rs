//! Builder pattern for constructing Bulwark instances
//!
//! This module provides a type-safe builder for creating [`Bulwark`] instances
//! with compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use bulwark::{BulwarkBuilder, LoginDefenseConfig};
//! use chrono::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bulwark = BulwarkBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_login_defense(LoginDefenseConfig {
//!             max_attempts: 3,
//!             lockout_duration: Duration::minutes(30),
//!             ..Default::default()
//!         })
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use bulwark_core::{
    AccountLockConfig, AttemptStore, AuditSink, InMemoryAttemptStore, LoginDefenseConfig,
    RateLimitCategory, RateLimitPolicies, RateLimitPolicy, repositories::RepositoryProvider,
    services::AuditLogger,
};

use crate::Bulwark;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Bulwark instance.
#[derive(Debug, thiserror::Error)]
pub enum BulwarkBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`BulwarkBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Bulwark`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build or add more configuration
pub struct BulwarkBuilder<Storage> {
    storage: Storage,
    policies: RateLimitPolicies,
    login_defense: LoginDefenseConfig,
    account_lock: AccountLockConfig,
    audit_sink: Option<Arc<dyn AuditSink>>,
    attempt_store: Option<Arc<dyn AttemptStore>>,
    apply_migrations: bool,
}

impl Default for BulwarkBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl BulwarkBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Rate limits: login 5/15min, api 100/1min, upload 10/1min, contact form 5/1h
    /// - Login defense: enabled, 5 failures, 15 minute lockout
    /// - Account locks: 15 minutes unless the request says otherwise
    /// - Audit sink: [`TracingAuditSink`](crate::TracingAuditSink)
    /// - Attempt store: a fresh [`InMemoryAttemptStore`]
    /// - Migrations: not applied automatically
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            policies: RateLimitPolicies::default(),
            login_defense: LoginDefenseConfig::default(),
            account_lock: AccountLockConfig::default(),
            audit_sink: None,
            attempt_store: None,
            apply_migrations: false,
        }
    }

    fn with_storage<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> BulwarkBuilder<WithStorage<R>> {
        BulwarkBuilder {
            storage: WithStorage { repositories },
            policies: self.policies,
            login_defense: self.login_defense,
            account_lock: self.account_lock,
            audit_sink: self.audit_sink,
            attempt_store: self.attempt_store,
            apply_migrations: self.apply_migrations,
        }
    }

    /// Use any [`RepositoryProvider`] implementation as storage.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> BulwarkBuilder<WithStorage<R>> {
        self.with_storage(repositories)
    }

    /// Configure SQLite storage from a connection URL.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use bulwark::BulwarkBuilder;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let bulwark = BulwarkBuilder::new()
    ///     .with_sqlite("sqlite://bulwark.db?mode=rwc")
    ///     .await?
    ///     .build()
    ///     .await?;
    /// bulwark.migrate().await?;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "sqlite")]
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<
        BulwarkBuilder<WithStorage<bulwark_storage_sqlite::SqliteRepositoryProvider>>,
        BulwarkBuilderError,
    > {
        let storage = bulwark_storage_sqlite::SqliteStorage::connect(url)
            .await
            .map_err(|e| BulwarkBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_storage(Arc::new(storage.into_repository_provider())))
    }

    /// Configure SQLite storage from an existing pool.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> BulwarkBuilder<WithStorage<bulwark_storage_sqlite::SqliteRepositoryProvider>> {
        self.with_storage(Arc::new(
            bulwark_storage_sqlite::SqliteRepositoryProvider::new(pool),
        ))
    }
}

impl<R: RepositoryProvider> BulwarkBuilder<WithStorage<R>> {
    /// Override the limits for one rate-limit category.
    ///
    /// ```rust,no_run
    /// use bulwark::{BulwarkBuilder, RateLimitCategory, RateLimitPolicy};
    /// use chrono::Duration;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let bulwark = BulwarkBuilder::new()
    ///     .with_sqlite("sqlite::memory:")
    ///     .await?
    ///     .with_rate_limit_policy(
    ///         RateLimitCategory::Upload,
    ///         RateLimitPolicy::new(3, Duration::minutes(1)),
    ///     )
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_rate_limit_policy(
        mut self,
        category: RateLimitCategory,
        policy: RateLimitPolicy,
    ) -> Self {
        self.policies.set(category, policy);
        self
    }

    /// Replace the whole policy table.
    pub fn with_rate_limit_policies(mut self, policies: RateLimitPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Configure login defense.
    ///
    /// Use [`LoginDefenseConfig::disabled`] to turn it off.
    pub fn with_login_defense(mut self, config: LoginDefenseConfig) -> Self {
        self.login_defense = config;
        self
    }

    pub fn with_account_lock(mut self, config: AccountLockConfig) -> Self {
        self.account_lock = config;
        self
    }

    /// Send audit events somewhere other than `tracing`.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Keep attempt counters in a custom store, e.g. one shared between
    /// processes.
    pub fn with_attempt_store(mut self, store: Arc<dyn AttemptStore>) -> Self {
        self.attempt_store = Some(store);
        self
    }

    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    fn validate(&self) -> Result<(), BulwarkBuilderError> {
        for category in RateLimitCategory::ALL {
            let policy = self.policies.policy(category);
            if policy.max_count == 0 || policy.window <= chrono::Duration::zero() {
                return Err(BulwarkBuilderError::InvalidConfiguration(format!(
                    "rate limit for {category} needs a positive count and window"
                )));
            }
        }

        let login = &self.login_defense;
        if login.enabled
            && (login.max_attempts == 0
                || login.attempt_window <= chrono::Duration::zero()
                || login.lockout_duration <= chrono::Duration::zero())
        {
            return Err(BulwarkBuilderError::InvalidConfiguration(
                "login defense needs positive attempts, window and lockout".to_string(),
            ));
        }

        if self.account_lock.default_duration <= chrono::Duration::zero() {
            return Err(BulwarkBuilderError::InvalidConfiguration(
                "default lock duration must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the Bulwark instance.
    ///
    /// Rejects non-positive limits and durations. If
    /// `apply_migrations(true)` was called, migrations are applied before
    /// returning.
    pub async fn build(self) -> Result<Bulwark<R>, BulwarkBuilderError> {
        self.validate()?;

        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| BulwarkBuilderError::Migration(e.to_string()))?;
        }

        let attempt_store = self
            .attempt_store
            .unwrap_or_else(|| Arc::new(InMemoryAttemptStore::new()));
        let audit = self.audit_sink.map(AuditLogger::new).unwrap_or_default();

        Ok(Bulwark::from_parts(
            self.storage.repositories,
            attempt_store,
            self.policies,
            self.login_defense,
            self.account_lock,
            audit,
        ))
    }
}
