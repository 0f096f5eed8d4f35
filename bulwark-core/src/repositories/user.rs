use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, LockState, User, UserId, user::NewUser};

/// Repository for the user records bulwark reads and locks.
///
/// The lock columns must only be written through [`update_lock_state`] and
/// [`clear_expired_locks`]; the lock manager is their sole writer.
///
/// [`update_lock_state`]: UserRepository::update_lock_state
/// [`clear_expired_locks`]: UserRepository::clear_expired_locks
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Create a user. New users start unlocked.
    async fn create(&self, user: NewUser) -> Result<User, Error>;

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, Error>;

    /// Overwrite all three lock columns at once.
    ///
    /// Returns `StorageError::NotFound` if the user does not exist.
    async fn update_lock_state(&self, id: &UserId, lock: &LockState) -> Result<User, Error>;

    /// Eager sweep: reset every user with `locked = true AND locked_until <= now`
    /// to the unlocked state in one statement. Returns the number of rows touched.
    async fn clear_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, Error>;

    /// Users whose durable `locked` flag is set, regardless of expiry.
    async fn find_locked(&self) -> Result<Vec<User>, Error>;
}
