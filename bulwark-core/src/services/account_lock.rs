//! Durable account locks.
//!
//! Lock state lives on the user record and is only ever written here. Expiry
//! is handled by two separate operations:
//!
//! - [`AccountLockService::is_account_locked`] is a pure predicate that
//!   treats a lapsed `locked_until` as unlocked without touching storage
//! - [`AccountLockService::auto_unlock_expired_accounts`] rewrites every
//!   lapsed lock in one pass, for code that reads the raw columns
//!
//! Unlike incident writes, failures to persist a lock or unlock propagate to
//! the caller.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    Error, LockState, User, UserId,
    error::{AccountError, ValidationError},
    incident::{IncidentType, NewIncident, Severity},
    rate_limit::duration_secs,
    repositories::{IncidentRepository, UserRepository},
    services::{
        audit::{AuditEvent, AuditLogger, AuditOutcome},
        incident::SecurityIncidentService,
    },
    validation::validate_actor,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLockConfig {
    /// Lock length when a request does not name one
    #[serde(with = "duration_secs")]
    pub default_duration: Duration,
}

impl Default for AccountLockConfig {
    fn default() -> Self {
        Self {
            default_duration: Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDuration {
    Minutes(i64),
    /// Only an administrator can lift it.
    Indefinite,
}

/// Parameters for [`AccountLockService::lock_account`].
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub user_id: UserId,
    pub reason: Option<String>,
    pub duration: Option<LockDuration>,
    /// `None` for automatic lockouts
    pub locked_by: Option<String>,
}

impl LockRequest {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            reason: None,
            duration: None,
            locked_by: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn duration_minutes(mut self, minutes: i64) -> Self {
        self.duration = Some(LockDuration::Minutes(minutes));
        self
    }

    pub fn indefinite(mut self) -> Self {
        self.duration = Some(LockDuration::Indefinite);
        self
    }

    pub fn locked_by(mut self, actor: impl Into<String>) -> Self {
        self.locked_by = Some(actor.into());
        self
    }
}

pub struct AccountLockService<U: UserRepository, I: IncidentRepository> {
    users: Arc<U>,
    incidents: Arc<SecurityIncidentService<I>>,
    config: AccountLockConfig,
    audit: AuditLogger,
}

impl<U: UserRepository, I: IncidentRepository> AccountLockService<U, I> {
    pub fn new(
        users: Arc<U>,
        incidents: Arc<SecurityIncidentService<I>>,
        config: AccountLockConfig,
        audit: AuditLogger,
    ) -> Self {
        Self {
            users,
            incidents,
            config,
            audit,
        }
    }

    pub fn config(&self) -> &AccountLockConfig {
        &self.config
    }

    /// Lock a user account and record who did it.
    pub async fn lock_account(&self, request: &LockRequest) -> Result<User, Error> {
        if let Some(actor) = request.locked_by.as_deref() {
            validate_actor(actor)?;
        }

        let duration = match request.duration {
            None => Some(self.config.default_duration),
            Some(LockDuration::Minutes(minutes)) => Some(
                Duration::try_minutes(minutes)
                    .filter(|d| *d > Duration::zero())
                    .ok_or_else(|| {
                        ValidationError::InvalidField(format!(
                            "Lock duration must be a positive number of minutes, got {minutes}"
                        ))
                    })?,
            ),
            Some(LockDuration::Indefinite) => None,
        };

        let now = Utc::now();
        let locked_until = duration
            .map(|duration| {
                now.checked_add_signed(duration).ok_or_else(|| {
                    ValidationError::InvalidField(format!(
                        "Lock duration of {} minutes is out of range",
                        duration.num_minutes()
                    ))
                })
            })
            .transpose()?;

        let user = self.require_user(&request.user_id).await?;

        let lock = LockState::locked(locked_until, request.reason.clone());
        let updated = self.users.update_lock_state(&user.id, &lock).await?;

        tracing::info!(
            user_id = %updated.id,
            locked_until = ?locked_until,
            locked_by = request.locked_by.as_deref().unwrap_or("system"),
            "Account locked"
        );

        self.audit.log(
            AuditEvent::new("account.locked", AuditOutcome::Success)
                .identifier(updated.username.as_str())
                .user_id(&updated.id)
                .actor(request.locked_by.as_deref())
                .details(json!({
                    "reason": request.reason,
                    "locked_until": locked_until,
                })),
        );

        let _ = self
            .incidents
            .record(
                NewIncident::builder(IncidentType::AccountLocked, lock_description(request))
                    .severity(Severity::High)
                    .user_id(Some(updated.id.clone()))
                    .username(Some(updated.username.clone()))
                    .metadata(json!({
                        "scope": "account",
                        "reason": request.reason,
                        "locked_until": locked_until,
                        "locked_by": request.locked_by,
                        "automatic": request.locked_by.is_none(),
                    }))
                    .build(),
            )
            .await;

        Ok(updated)
    }

    /// Clear all lock fields on a user account.
    pub async fn unlock_account(
        &self,
        user_id: &UserId,
        unlocked_by: Option<&str>,
    ) -> Result<User, Error> {
        if let Some(actor) = unlocked_by {
            validate_actor(actor)?;
        }

        let user = self.require_user(user_id).await?;
        let was_locked = user.is_locked();

        let updated = self
            .users
            .update_lock_state(&user.id, &LockState::unlocked())
            .await?;

        tracing::info!(user_id = %updated.id, was_locked, "Account unlocked");

        self.audit.log(
            AuditEvent::new("account.unlocked", AuditOutcome::Success)
                .identifier(updated.username.as_str())
                .user_id(&updated.id)
                .actor(unlocked_by)
                .details(json!({ "was_locked": was_locked })),
        );

        let description = match unlocked_by {
            Some(actor) => format!("Account unlocked by {actor}"),
            None => "Account unlocked".to_string(),
        };
        let _ = self
            .incidents
            .record(
                NewIncident::builder(IncidentType::AccountUnlocked, description)
                    .severity(Severity::Low)
                    .user_id(Some(updated.id.clone()))
                    .username(Some(updated.username.clone()))
                    .metadata(json!({
                        "unlocked_by": unlocked_by,
                        "was_locked": was_locked,
                    }))
                    .build(),
            )
            .await;

        Ok(updated)
    }

    /// Pure lazy-expiry check. Never touches storage.
    pub fn is_account_locked(&self, user: &User) -> bool {
        self.is_account_locked_at(user, Utc::now())
    }

    pub fn is_account_locked_at(&self, user: &User, now: DateTime<Utc>) -> bool {
        user.lock.is_locked_at(now)
    }

    /// Eager sweep: clear every lock whose expiry has passed.
    pub async fn auto_unlock_expired_accounts(&self) -> Result<u64, Error> {
        let cleared = self.users.clear_expired_locks(Utc::now()).await?;

        if cleared > 0 {
            tracing::info!(count = cleared, "Cleared expired account locks");
            self.audit.log(
                AuditEvent::new("account.auto_unlocked", AuditOutcome::Success)
                    .details(json!({ "count": cleared })),
            );
        }

        Ok(cleared)
    }

    /// Human-readable lock status, or `None` when the account is usable.
    pub fn lock_status_message(&self, user: &User) -> Option<String> {
        lock_status_message_at(&user.lock, Utc::now())
    }

    /// Users whose durable `locked` flag is set, after running the eager sweep.
    pub async fn locked_accounts(&self) -> Result<Vec<User>, Error> {
        self.auto_unlock_expired_accounts().await?;
        self.users.find_locked().await
    }

    async fn require_user(&self, user_id: &UserId) -> Result<User, Error> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AccountError::UserNotFound(user_id.to_string()).into())
    }
}

fn lock_description(request: &LockRequest) -> String {
    match (&request.locked_by, &request.reason) {
        (Some(actor), Some(reason)) => format!("Account locked by {actor}: {reason}"),
        (Some(actor), None) => format!("Account locked by {actor}"),
        (None, Some(reason)) => format!("Account locked automatically: {reason}"),
        (None, None) => "Account locked automatically".to_string(),
    }
}

pub(crate) fn lock_status_message_at(lock: &LockState, now: DateTime<Utc>) -> Option<String> {
    if !lock.is_locked_at(now) {
        return None;
    }

    if let Some(until) = lock.locked_until {
        let seconds = (until - now).num_seconds().max(1);
        let minutes = (seconds + 59) / 60;
        let unit = if minutes == 1 { "minute" } else { "minutes" };
        return Some(format!(
            "Account is temporarily locked. Try again in {minutes} {unit}."
        ));
    }

    Some(match lock.locked_reason.as_deref() {
        Some(reason) if !reason.trim().is_empty() => format!("Account is locked: {reason}"),
        _ => "Account is locked. Contact an administrator.".to_string(),
    })
}
