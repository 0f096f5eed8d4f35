//! Login-specific attempt tracking with an explicit lockout phase.
//!
//! Each identifier moves through four phases:
//!
//! - **Clean**: no record, logins allowed
//! - **Accumulating**: failures counted inside the attempt window
//! - **Locked**: `locked_until` set and in the future, logins denied
//! - **Expired lock**: `locked_until` in the past, treated as Clean and discarded
//!
//! The counters are ephemeral and share the `login:` key namespace of the
//! generic tracker. Durable account locks are the job of
//! [`AccountLockService`](super::AccountLockService); this service only
//! decides when to escalate.
//!
//! # Example
//!
//! ```rust,ignore
//! let status = defense.check_rate_limit("alice").await?;
//! if !status.allowed {
//!     return Err(locked_out(status.lockout_until));
//! }
//!
//! if verify(password) {
//!     defense.clear_failed_login("alice").await?;
//! } else {
//!     let failed = defense.record_failed_login("alice", Some("203.0.113.7")).await?;
//!     if failed.newly_locked { /* escalate */ }
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::{
    Error,
    incident::{IncidentType, NewIncident, Severity},
    rate_limit::{
        AttemptKey, FailedLoginStatus, LoginDefenseConfig, LoginRateLimitStatus, RateLimitCategory,
    },
    repositories::{AttemptStore, IncidentRepository},
    services::{
        audit::{AuditEvent, AuditLogger, AuditOutcome},
        incident::SecurityIncidentService,
        rate_limit::{SWEEP_EVERY, SweepSchedule},
    },
    validation::validate_identifier,
};

pub struct LoginDefenseService<I: IncidentRepository> {
    store: Arc<dyn AttemptStore>,
    config: LoginDefenseConfig,
    incidents: Arc<SecurityIncidentService<I>>,
    audit: AuditLogger,
    sweep: SweepSchedule,
}

impl<I: IncidentRepository> LoginDefenseService<I> {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        config: LoginDefenseConfig,
        incidents: Arc<SecurityIncidentService<I>>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            store,
            config,
            incidents,
            audit,
            sweep: SweepSchedule::new(SWEEP_EVERY),
        }
    }

    pub fn config(&self) -> &LoginDefenseConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether `identifier` may attempt a login now.
    ///
    /// Reaching `max_attempts` inside the window locks the identifier here if
    /// [`record_failed_login`](Self::record_failed_login) has not already.
    pub async fn check_rate_limit(&self, identifier: &str) -> Result<LoginRateLimitStatus, Error> {
        validate_identifier(identifier)?;

        if !self.config.enabled {
            return Ok(self.clean_status(identifier));
        }

        let key = login_key(identifier);
        let now = Utc::now();

        let Some(record) = self.store.get(&key).await? else {
            return Ok(self.clean_status(identifier));
        };

        if let Some(until) = record.locked_until.filter(|until| *until > now) {
            return Ok(locked_status(identifier, until));
        }

        if record.is_expired(now) {
            if self.store.remove_expired(&key, now).await? && record.locked_until.is_some() {
                tracing::debug!(identifier, "Login lockout expired");
            }
            return Ok(self.clean_status(identifier));
        }

        if record.count >= self.config.max_attempts {
            let until = self.lock(&key, record.count, None, now).await?;
            return Ok(locked_status(identifier, until));
        }

        Ok(LoginRateLimitStatus {
            identifier: identifier.to_string(),
            allowed: true,
            remaining_attempts: Some(self.config.max_attempts - record.count),
            lockout_until: None,
        })
    }

    /// Count a failed login for `identifier`.
    ///
    /// While a lock is live further failures are not counted. The call that
    /// crosses `max_attempts` sets the lock and reports `newly_locked`.
    pub async fn record_failed_login(
        &self,
        identifier: &str,
        ip_address: Option<&str>,
    ) -> Result<FailedLoginStatus, Error> {
        validate_identifier(identifier)?;

        if !self.config.enabled {
            return Ok(FailedLoginStatus {
                identifier: identifier.to_string(),
                failed_attempts: 0,
                locked_until: None,
                newly_locked: false,
            });
        }

        let key = login_key(identifier);
        let now = Utc::now();

        if let Some(existing) = self.store.get(&key).await? {
            if let Some(until) = existing.locked_until.filter(|until| *until > now) {
                return Ok(FailedLoginStatus {
                    identifier: identifier.to_string(),
                    failed_attempts: existing.count,
                    locked_until: Some(until),
                    newly_locked: false,
                });
            }
        }

        // An elapsed lock or window is replaced by a fresh one inside the
        // store's atomic increment.
        let record = self
            .store
            .increment(&key, self.config.attempt_window, now)
            .await?;
        self.sweep.after_write(self.store.as_ref(), now).await;

        self.audit.log(
            AuditEvent::new("login.failed", AuditOutcome::Failure)
                .identifier(identifier)
                .ip_address(ip_address)
                .details(json!({
                    "failed_attempts": record.count,
                    "max_attempts": self.config.max_attempts,
                })),
        );

        if record.count < self.config.max_attempts {
            return Ok(FailedLoginStatus {
                identifier: identifier.to_string(),
                failed_attempts: record.count,
                locked_until: None,
                newly_locked: false,
            });
        }

        let until = now + self.config.lockout_duration;
        let newly_locked = self.store.lock_until(&key, until, now).await?;

        let locked_until = if newly_locked {
            self.on_locked(identifier, record.count, until, ip_address).await;
            Some(until)
        } else {
            self.store
                .get(&key)
                .await?
                .and_then(|record| record.locked_until)
        };

        Ok(FailedLoginStatus {
            identifier: identifier.to_string(),
            failed_attempts: record.count,
            locked_until,
            newly_locked,
        })
    }

    /// Forget all failures for `identifier`, whatever phase it was in.
    pub async fn clear_failed_login(&self, identifier: &str) -> Result<(), Error> {
        validate_identifier(identifier)?;

        if self.store.remove(&login_key(identifier)).await? {
            tracing::debug!(identifier, "Cleared failed login attempts");
        }
        Ok(())
    }

    async fn lock(
        &self,
        key: &AttemptKey,
        failed_attempts: u32,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, Error> {
        let until = now + self.config.lockout_duration;

        if self.store.lock_until(key, until, now).await? {
            self.on_locked(&key.identifier, failed_attempts, until, ip_address)
                .await;
            return Ok(until);
        }

        // Lost the race; report whichever lock won.
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|record| record.locked_until)
            .unwrap_or(until))
    }

    async fn on_locked(
        &self,
        identifier: &str,
        failed_attempts: u32,
        until: DateTime<Utc>,
        ip_address: Option<&str>,
    ) {
        tracing::warn!(
            identifier,
            failed_attempts,
            locked_until = %until,
            "Login locked after repeated failures"
        );

        self.audit.log(
            AuditEvent::new("login.locked", AuditOutcome::Denied)
                .identifier(identifier)
                .ip_address(ip_address)
                .details(json!({
                    "failed_attempts": failed_attempts,
                    "locked_until": until,
                })),
        );

        let _ = self
            .incidents
            .record(
                NewIncident::builder(
                    IncidentType::AccountLocked,
                    format!("Login locked after {failed_attempts} failed attempts"),
                )
                .severity(Severity::High)
                .username(Some(identifier.to_string()))
                .ip_address(ip_address.map(str::to_string))
                .metadata(json!({
                    "scope": "login",
                    "failed_attempts": failed_attempts,
                    "locked_until": until,
                    "lockout_minutes": self.config.lockout_duration.num_minutes(),
                }))
                .build(),
            )
            .await;
    }

    fn clean_status(&self, identifier: &str) -> LoginRateLimitStatus {
        LoginRateLimitStatus {
            identifier: identifier.to_string(),
            allowed: true,
            remaining_attempts: self.config.enabled.then_some(self.config.max_attempts),
            lockout_until: None,
        }
    }
}

fn login_key(identifier: &str) -> AttemptKey {
    AttemptKey::new(RateLimitCategory::Login, identifier)
}

fn locked_status(identifier: &str, until: DateTime<Utc>) -> LoginRateLimitStatus {
    LoginRateLimitStatus {
        identifier: identifier.to_string(),
        allowed: false,
        remaining_attempts: Some(0),
        lockout_until: Some(until),
    }
}
