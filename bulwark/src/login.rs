//! The end-to-end login guard.
//!
//! [`Bulwark::authenticate`] strings the services together in the order a
//! login handler needs them. Password checking itself stays with the host,
//! behind [`CredentialVerifier`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use bulwark_core::{
    IncidentType, LockRequest, NewIncident, RequestContext, Severity, User,
    repositories::RepositoryProvider,
    services::{AuditEvent, AuditOutcome},
    validation::validate_identifier,
};

use crate::{Bulwark, BulwarkError};

const GENERIC_FAILURE: &str = "Invalid username or password";

/// Checks a password against the host's own credential store.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// `Ok(false)` means the credentials are wrong. `Err` means the check
    /// could not be made at all and is surfaced as [`BulwarkError::Verifier`].
    async fn verify(&self, user: &User, password: &str) -> Result<bool, BulwarkError>;
}

/// Result of [`Bulwark::authenticate`].
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Success(User),
    /// Wrong password or unknown user. Indistinguishable to the caller.
    InvalidCredentials { remaining_attempts: Option<u32> },
    /// Too many recent failures for this identifier.
    Throttled {
        retry_after_seconds: i64,
        lockout_until: DateTime<Utc>,
    },
    /// The account itself carries a durable lock.
    Locked {
        message: String,
        locked_until: Option<DateTime<Utc>>,
    },
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::Success(_))
    }

    /// Text safe to show the person at the login form.
    ///
    /// Throttling and bad credentials share one message so the form does not
    /// reveal whether a username exists. Lock detail is only shown once the
    /// account is known to be locked.
    pub fn public_message(&self) -> String {
        match self {
            LoginOutcome::Success(_) => "Signed in".to_string(),
            LoginOutcome::Locked { message, .. } => message.clone(),
            LoginOutcome::InvalidCredentials { .. } | LoginOutcome::Throttled { .. } => {
                GENERIC_FAILURE.to_string()
            }
        }
    }
}

impl<R: RepositoryProvider> Bulwark<R> {
    /// Run one guarded login attempt.
    ///
    /// 1. Sweep expired account locks.
    /// 2. Refuse if login defense has the username locked out.
    /// 3. Refuse if the account carries a live durable lock.
    /// 4. Verify the password; on failure count it and escalate to a durable
    ///    lock when the threshold trips; on success clear the counter.
    ///
    /// Incident writes along the way are best-effort and never change the
    /// outcome. A failed durable lock write is returned as an error.
    pub async fn authenticate<V: CredentialVerifier + ?Sized>(
        &self,
        username: &str,
        password: &str,
        context: &RequestContext,
        verifier: &V,
    ) -> Result<LoginOutcome, BulwarkError> {
        validate_identifier(username).map_err(bulwark_core::Error::from)?;

        // Lock checks below are lazy, so a failed sweep is not fatal.
        if let Err(e) = self.account_lock_service.auto_unlock_expired_accounts().await {
            tracing::warn!(error = %e, "Failed to sweep expired account locks");
        }

        let status = self.login_defense_service.check_rate_limit(username).await?;
        if let (false, Some(lockout_until)) = (status.allowed, status.lockout_until) {
            tracing::debug!(username, "Login throttled");
            return Ok(LoginOutcome::Throttled {
                retry_after_seconds: status.retry_after_seconds().unwrap_or_default(),
                lockout_until,
            });
        }

        let user = self.get_user_by_username(username).await?;

        if let Some(user) = &user {
            if self.account_lock_service.is_account_locked(user) {
                self.audit.log(
                    AuditEvent::new("login.denied_locked", AuditOutcome::Denied)
                        .identifier(username)
                        .user_id(&user.id)
                        .ip_address(context.ip()),
                );
                return Ok(LoginOutcome::Locked {
                    message: self
                        .account_lock_service
                        .lock_status_message(user)
                        .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
                    locked_until: user.lock.locked_until,
                });
            }
        }

        let verified = match &user {
            Some(user) => verifier.verify(user, password).await?,
            None => false,
        };

        match user {
            Some(user) if verified => self.on_login_succeeded(user, context).await,
            user => self.on_login_failed(username, user, context).await,
        }
    }

    async fn on_login_succeeded(
        &self,
        user: User,
        context: &RequestContext,
    ) -> Result<LoginOutcome, BulwarkError> {
        self.login_defense_service
            .clear_failed_login(&user.username)
            .await?;

        self.audit.log(
            AuditEvent::new("login.succeeded", AuditOutcome::Success)
                .identifier(user.username.as_str())
                .user_id(&user.id)
                .ip_address(context.ip()),
        );

        let _ = self
            .incident_service
            .record(
                NewIncident::builder(IncidentType::SuccessfulLogin, "Successful login")
                    .severity(Severity::Low)
                    .user_id(Some(user.id.clone()))
                    .username(Some(user.username.clone()))
                    .ip_address(context.ip_address.clone())
                    .user_agent(context.user_agent.clone())
                    .build(),
            )
            .await;

        Ok(LoginOutcome::Success(user))
    }

    async fn on_login_failed(
        &self,
        username: &str,
        user: Option<User>,
        context: &RequestContext,
    ) -> Result<LoginOutcome, BulwarkError> {
        let failed = self
            .login_defense_service
            .record_failed_login(username, context.ip())
            .await?;

        if failed.newly_locked {
            if let Some(user) = &user {
                let lockout = self.login_defense_service.config().lockout_duration;
                let minutes = ((lockout.num_seconds() + 59) / 60).max(1);

                self.account_lock_service
                    .lock_account(
                        &LockRequest::new(user.id.clone())
                            .reason("Too many failed login attempts")
                            .duration_minutes(minutes),
                    )
                    .await?;
            }
        }

        let _ = self
            .incident_service
            .record(
                NewIncident::builder(IncidentType::FailedLogin, "Failed login attempt")
                    .user_id(user.as_ref().map(|u| u.id.clone()))
                    .username(Some(username.to_string()))
                    .ip_address(context.ip_address.clone())
                    .user_agent(context.user_agent.clone())
                    .metadata(json!({
                        "failed_attempts": failed.failed_attempts,
                        "known_user": user.is_some(),
                    }))
                    .build(),
            )
            .await;

        let remaining_attempts = self.login_defense_service.is_enabled().then(|| {
            self.login_defense_service
                .config()
                .max_attempts
                .saturating_sub(failed.failed_attempts)
        });

        Ok(LoginOutcome::InvalidCredentials { remaining_attempts })
    }
}
