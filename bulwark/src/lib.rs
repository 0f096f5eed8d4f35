//! # Bulwark
//!
//! Bulwark is the authentication-defense layer for Rust web applications. It
//! sits in front of whatever checks your users' passwords and decides whether
//! an attempt may proceed at all:
//!
//! - fixed-window rate limits per identifier and category (login, API,
//!   uploads, contact forms)
//! - login defense that escalates repeated failures into a lockout
//! - durable account locks with lazy expiry and an eager sweep
//! - a security incident log with filtering, resolution and statistics
//! - a structured audit trail under the `bulwark::audit` tracing target
//!
//! Attempt counters live in process memory behind the
//! [`AttemptStore`] trait. Lock state and incidents are persisted through a
//! [`RepositoryProvider`], SQLite by default.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bulwark::{BulwarkBuilder, RateLimitCategory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bulwark = BulwarkBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let decision = bulwark
//!         .consume_rate_limit("203.0.113.7", RateLimitCategory::ContactForm)
//!         .await?;
//!     if !decision.allowed {
//!         println!("retry in {:?}s", decision.retry_after_seconds);
//!     }
//!
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use bulwark_core::{
    repositories::{IncidentRepositoryProvider, UserRepository, UserRepositoryProvider},
    services::{
        AccountLockService, AuditLogger, LoginDefenseService, RateLimitService,
        SecurityIncidentService,
    },
};
use tokio::{sync::watch, task::JoinHandle};

mod builder;
mod login;

pub use builder::{BulwarkBuilder, BulwarkBuilderError, NoStorage, WithStorage};
pub use login::{CredentialVerifier, LoginOutcome};

pub use bulwark_core::{
    AccountLockConfig, AttemptStore, AuditSink, BestEffort, Error as CoreError,
    FailedLoginStatus, IncidentFilter, IncidentPage, IncidentStatistics, IncidentType,
    InMemoryAttemptStore, LockRequest, LockState, LoginDefenseConfig, LoginRateLimitStatus,
    NewIncident, NewUser, RateLimitCategory, RateLimitDecision, RateLimitPolicies,
    RateLimitPolicy, RequestContext, SecurityIncident, Severity, User, UserId,
    rate_limit::seconds_until,
    repositories::RepositoryProvider,
    services::{AuditEvent, AuditOutcome, AuditSinkError, LockDuration, TracingAuditSink},
};

#[cfg(feature = "sqlite")]
pub use bulwark_storage_sqlite::{SqliteRepositoryProvider, SqliteStorage};

/// Errors that can occur when using Bulwark.
#[derive(Debug, thiserror::Error)]
pub enum BulwarkError {
    /// Error raised by one of the core services
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Error while migrating or probing storage
    #[error("Storage error: {0}")]
    StorageError(String),
    /// The host's credential verifier failed to produce an answer
    #[error("Credential verification failed: {0}")]
    Verifier(String),
}

impl BulwarkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BulwarkError::Core(e) if e.is_not_found())
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, BulwarkError::Core(e) if e.is_validation_error())
    }
}

/// The main Bulwark handle.
///
/// Holds one instance of every service, wired to a shared attempt store and
/// the repositories of a single [`RepositoryProvider`]. Cheap to share behind
/// an `Arc`; every method takes `&self`.
///
/// # Example
///
/// ```rust,no_run
/// use bulwark::{Bulwark, LockRequest, SqliteRepositoryProvider};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = sqlx::SqlitePool::connect("sqlite::memory:").await?;
///     let repositories = Arc::new(SqliteRepositoryProvider::new(pool));
///
///     let bulwark = Bulwark::new(repositories);
///     bulwark.migrate().await?;
///
///     let user = bulwark.create_user(bulwark::NewUser::new("alice")).await?;
///     bulwark
///         .lock_account(&LockRequest::new(user.id.clone()).locked_by("admin-1"))
///         .await?;
///
///     Ok(())
/// }
/// ```
pub struct Bulwark<R: RepositoryProvider> {
    repositories: Arc<R>,
    rate_limit_service: Arc<RateLimitService>,
    login_defense_service: Arc<LoginDefenseService<R::IncidentRepo>>,
    account_lock_service: Arc<AccountLockService<R::UserRepo, R::IncidentRepo>>,
    incident_service: Arc<SecurityIncidentService<R::IncidentRepo>>,
    audit: AuditLogger,
}

impl<R: RepositoryProvider> Bulwark<R> {
    /// Create a new Bulwark instance with default policies.
    ///
    /// Attempt counters are kept in a fresh [`InMemoryAttemptStore`] and audit
    /// events go to [`TracingAuditSink`]. Use [`BulwarkBuilder`] to change any
    /// of this.
    pub fn new(repositories: Arc<R>) -> Self {
        Self::from_parts(
            repositories,
            Arc::new(InMemoryAttemptStore::new()),
            RateLimitPolicies::default(),
            LoginDefenseConfig::default(),
            AccountLockConfig::default(),
            AuditLogger::default(),
        )
    }

    pub(crate) fn from_parts(
        repositories: Arc<R>,
        attempt_store: Arc<dyn AttemptStore>,
        policies: RateLimitPolicies,
        login_defense: LoginDefenseConfig,
        account_lock: AccountLockConfig,
        audit: AuditLogger,
    ) -> Self {
        let incident_service = Arc::new(SecurityIncidentService::new(
            repositories.incident(),
            audit.clone(),
        ));

        let rate_limit_service = Arc::new(RateLimitService::new(
            Arc::clone(&attempt_store),
            policies,
            audit.clone(),
        ));

        let login_defense_service = Arc::new(LoginDefenseService::new(
            attempt_store,
            login_defense,
            Arc::clone(&incident_service),
            audit.clone(),
        ));

        let account_lock_service = Arc::new(AccountLockService::new(
            repositories.user(),
            Arc::clone(&incident_service),
            account_lock,
            audit.clone(),
        ));

        Self {
            repositories,
            rate_limit_service,
            login_defense_service,
            account_lock_service,
            incident_service,
            audit,
        }
    }

    /// Run migrations for all repositories
    pub async fn migrate(&self) -> Result<(), BulwarkError> {
        self.repositories
            .migrate()
            .await
            .map_err(|e| BulwarkError::StorageError(e.to_string()))
    }

    /// Health check for all repositories
    pub async fn health_check(&self) -> Result<(), BulwarkError> {
        self.repositories
            .health_check()
            .await
            .map_err(|e| BulwarkError::StorageError(e.to_string()))
    }

    pub fn rate_limit_service(&self) -> &RateLimitService {
        &self.rate_limit_service
    }

    pub fn login_defense_service(&self) -> &LoginDefenseService<R::IncidentRepo> {
        &self.login_defense_service
    }

    pub fn account_lock_service(&self) -> &AccountLockService<R::UserRepo, R::IncidentRepo> {
        &self.account_lock_service
    }

    pub fn incident_service(&self) -> &SecurityIncidentService<R::IncidentRepo> {
        &self.incident_service
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create a user record. Lock fields start cleared.
    pub async fn create_user(&self, user: NewUser) -> Result<User, BulwarkError> {
        Ok(self.repositories.user().create(user).await?)
    }

    /// Get a user by their ID
    pub async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, BulwarkError> {
        Ok(self.repositories.user().find_by_id(user_id).await?)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, BulwarkError> {
        Ok(self.repositories.user().find_by_username(username).await?)
    }

    // ------------------------------------------------------------------
    // Attempt tracker
    // ------------------------------------------------------------------

    /// Whether `identifier` may proceed in `category`. Does not consume a slot.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<RateLimitDecision, BulwarkError> {
        Ok(self.rate_limit_service.check(identifier, category).await?)
    }

    /// Count one request against `identifier` without asking first.
    pub async fn record_request(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<RateLimitDecision, BulwarkError> {
        Ok(self.rate_limit_service.record(identifier, category).await?)
    }

    /// Take a slot if one is free. The usual call for guarding an endpoint.
    pub async fn consume_rate_limit(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<RateLimitDecision, BulwarkError> {
        Ok(self.rate_limit_service.consume(identifier, category).await?)
    }

    pub async fn reset_rate_limit(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<(), BulwarkError> {
        Ok(self.rate_limit_service.reset(identifier, category).await?)
    }

    // ------------------------------------------------------------------
    // Login defense
    // ------------------------------------------------------------------

    pub async fn check_login_rate_limit(
        &self,
        identifier: &str,
    ) -> Result<LoginRateLimitStatus, BulwarkError> {
        Ok(self.login_defense_service.check_rate_limit(identifier).await?)
    }

    pub async fn record_failed_login(
        &self,
        identifier: &str,
        context: &RequestContext,
    ) -> Result<FailedLoginStatus, BulwarkError> {
        Ok(self
            .login_defense_service
            .record_failed_login(identifier, context.ip())
            .await?)
    }

    pub async fn clear_failed_login(&self, identifier: &str) -> Result<(), BulwarkError> {
        Ok(self.login_defense_service.clear_failed_login(identifier).await?)
    }

    // ------------------------------------------------------------------
    // Account locks
    // ------------------------------------------------------------------

    /// Lock an account. Storage failures are returned, never swallowed.
    pub async fn lock_account(&self, request: &LockRequest) -> Result<User, BulwarkError> {
        Ok(self.account_lock_service.lock_account(request).await?)
    }

    pub async fn unlock_account(
        &self,
        user_id: &UserId,
        unlocked_by: Option<&str>,
    ) -> Result<User, BulwarkError> {
        Ok(self
            .account_lock_service
            .unlock_account(user_id, unlocked_by)
            .await?)
    }

    /// Pure check with lazy expiry: an elapsed `locked_until` reads as unlocked.
    pub fn is_account_locked(&self, user: &User) -> bool {
        self.account_lock_service.is_account_locked(user)
    }

    /// Clear every lock whose expiry has passed. Returns how many were cleared.
    pub async fn auto_unlock_expired_accounts(&self) -> Result<u64, BulwarkError> {
        Ok(self
            .account_lock_service
            .auto_unlock_expired_accounts()
            .await?)
    }

    pub fn lock_status_message(&self, user: &User) -> Option<String> {
        self.account_lock_service.lock_status_message(user)
    }

    /// Users whose durable lock flag is set, after sweeping expired locks.
    pub async fn locked_accounts(&self) -> Result<Vec<User>, BulwarkError> {
        Ok(self.account_lock_service.locked_accounts().await?)
    }

    // ------------------------------------------------------------------
    // Security incidents
    // ------------------------------------------------------------------

    /// Record an incident. Returns `None` when the write failed; the failure
    /// has already been logged.
    pub async fn create_security_incident(&self, incident: NewIncident) -> Option<SecurityIncident> {
        self.incident_service.record(incident).await.ok()
    }

    pub async fn get_security_incidents(
        &self,
        filter: &IncidentFilter,
    ) -> Result<IncidentPage, BulwarkError> {
        Ok(self.incident_service.query(filter).await?)
    }

    pub async fn resolve_security_incident(
        &self,
        incident_id: &str,
        resolved_by: &str,
    ) -> Result<SecurityIncident, BulwarkError> {
        Ok(self.incident_service.resolve(incident_id, resolved_by).await?)
    }

    pub async fn incident_statistics(&self) -> Result<IncidentStatistics, BulwarkError> {
        Ok(self.incident_service.statistics().await?)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Start a periodic sweep of expired attempt records.
    ///
    /// Optional: stale records are already ignored on read and purged once
    /// every [`SWEEP_EVERY`](bulwark_core::services::rate_limit::SWEEP_EVERY)
    /// (100) writes. The task stops when `shutdown` changes.
    pub fn start_cleanup_task(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.rate_limit_service.start_cleanup_task(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        let err = BulwarkError::from(CoreError::Account(
            bulwark_core::error::AccountError::UserNotFound("usr_1".into()),
        ));
        assert!(err.is_not_found());
        assert!(!err.is_validation_error());

        let err = BulwarkError::StorageError("down".into());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Storage error: down");
    }
}
