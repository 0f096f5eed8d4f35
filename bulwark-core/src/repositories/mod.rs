//! Repository traits for data access layer
//!
//! Services talk to storage only through these traits:
//!
//! - [`AttemptStore`] holds the ephemeral rate-limit counters
//! - [`UserRepository`] reads users and writes their lock columns
//! - [`IncidentRepository`] holds the durable security incident log
//!
//! Durable backends expose their repositories through the provider traits,
//! combined in [`RepositoryProvider`] together with lifecycle methods.

pub mod attempt;
pub mod incident;
pub mod user;

pub use attempt::{AttemptStore, InMemoryAttemptStore};
pub use incident::IncidentRepository;
pub use user::UserRepository;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Error;

/// Provider trait for user repository access.
pub trait UserRepositoryProvider: Send + Sync + 'static {
    type UserRepo: UserRepository;

    fn user(&self) -> Arc<Self::UserRepo>;
}

/// Provider trait for incident repository access.
pub trait IncidentRepositoryProvider: Send + Sync + 'static {
    type IncidentRepo: IncidentRepository;

    fn incident(&self) -> Arc<Self::IncidentRepo>;
}

/// Provider trait that durable storage backends implement.
///
/// # Example
///
/// ```rust,ignore
/// use bulwark_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl UserRepositoryProvider for MyStorage {
///     type UserRepo = MyUserRepository;
///     fn user(&self) -> Arc<Self::UserRepo> { self.user.clone() }
/// }
///
/// // ... IncidentRepositoryProvider ...
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider: UserRepositoryProvider + IncidentRepositoryProvider {
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
