//! User records as seen by the lock manager
//!
//! bulwark does not own the user table; it only reads users and mutates the
//! three lock columns. The fields it relies on are:
//!
//! | Field           | Type               | Description                                          |
//! | --------------- | ------------------ | ---------------------------------------------------- |
//! | `id`            | `UserId`           | The unique identifier for the user.                  |
//! | `username`      | `String`           | Login name, also the login-defense identifier.       |
//! | `email`         | `Option<String>`   | Contact address, informational only.                 |
//! | `lock`          | `LockState`        | `locked`, `locked_until` and `locked_reason`.        |
//! | `created_at`    | `DateTime`         | The timestamp when the user was created.             |
//! | `updated_at`    | `DateTime`         | The timestamp when the user was last updated.        |
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    error::utilities::RequiredFieldExt,
    id::{generate_prefixed_id, validate_prefixed_id},
};

/// A unique, stable identifier for a specific user
/// This value should be treated as opaque
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: &str) -> Self {
        UserId(id.to_string())
    }

    pub fn new_random() -> Self {
        UserId(generate_prefixed_id("usr"))
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        validate_prefixed_id(&self.0, "usr")
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new_random()
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable lock columns on a user record.
///
/// `locked_until == None` while `locked` is set means an indefinite lock that
/// only an administrator can lift. A `locked_until` in the past means the lock
/// has lapsed even though `locked` may still read `true` until the next write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub locked_reason: Option<String>,
}

impl LockState {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn locked(locked_until: Option<DateTime<Utc>>, reason: Option<String>) -> Self {
        Self {
            locked: true,
            locked_until,
            locked_reason: reason,
        }
    }

    /// Lazy expiry: whether the lock is in force at `now`. Never mutates.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        if !self.locked {
            return false;
        }

        match self.locked_until {
            Some(until) => until > now,
            None => true,
        }
    }

    /// The lock flag is still set but its expiry has passed.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.locked_until.is_some_and(|until| until <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    #[serde(flatten)]
    pub lock: LockState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn builder() -> UserBuilder {
        UserBuilder::default()
    }

    /// Pure predicate, safe on every authentication attempt.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked_at(Utc::now())
    }
}

#[derive(Default)]
pub struct UserBuilder {
    id: Option<UserId>,
    username: Option<String>,
    email: Option<String>,
    lock: LockState,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl UserBuilder {
    pub fn id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn lock(mut self, lock: LockState) -> Self {
        self.lock = lock;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn build(self) -> Result<User, Error> {
        let now = Utc::now();
        Ok(User {
            id: self.id.unwrap_or_default(),
            username: self.username.require_field("Username")?,
            email: self.email,
            lock: self.lock,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
        })
    }
}

/// Insert payload for the user store. New users always start unlocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: UserId::new_random(),
            username: username.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}
