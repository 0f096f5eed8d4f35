//! Structured audit logging.
//!
//! Every security-relevant transition produces one [`AuditEvent`]. Events go
//! to an [`AuditSink`]; the default [`TracingAuditSink`] writes them as
//! structured `tracing` events under the `bulwark::audit` target.
//!
//! Emission is best-effort: a failing or panicking sink is reported through
//! `tracing::warn!` and otherwise ignored, so audit output can never change
//! the outcome of an authentication decision.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub const AUDIT_TARGET: &str = "bulwark::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
        }
    }
}

/// One structured audit line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: &'static str,
    pub outcome: AuditOutcome,
    pub identifier: Option<String>,
    pub user_id: Option<String>,
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: &'static str, outcome: AuditOutcome) -> Self {
        Self {
            action,
            outcome,
            identifier: None,
            user_id: None,
            actor: None,
            ip_address: None,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn user_id(mut self, user_id: impl ToString) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    pub fn ip_address(mut self, ip_address: Option<&str>) -> Self {
        self.ip_address = ip_address.map(str::to_string);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Error)]
#[error("Audit sink error: {0}")]
pub struct AuditSinkError(pub String);

/// Destination for audit events.
pub trait AuditSink: Send + Sync + 'static {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

/// Writes audit events as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        let identifier = event.identifier.as_deref().unwrap_or_default();
        let user_id = event.user_id.as_deref().unwrap_or_default();
        let actor = event.actor.as_deref().unwrap_or_default();
        let ip_address = event.ip_address.as_deref().unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                target: AUDIT_TARGET,
                action = event.action,
                outcome = event.outcome.as_str(),
                identifier,
                user_id,
                actor,
                ip_address,
                details = %event.details,
                "security event"
            ),
            AuditOutcome::Failure | AuditOutcome::Denied => tracing::warn!(
                target: AUDIT_TARGET,
                action = event.action,
                outcome = event.outcome.as_str(),
                identifier,
                user_id,
                actor,
                ip_address,
                details = %event.details,
                "security event"
            ),
        }

        Ok(())
    }
}

/// Cheap, cloneable handle to the configured sink.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Emit `event`. Never fails and never panics.
    pub fn log(&self, event: AuditEvent) {
        match catch_unwind(AssertUnwindSafe(|| self.sink.emit(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, action = event.action, "Dropped audit event");
            }
            Err(_) => {
                tracing::warn!(action = event.action, "Audit sink panicked; event dropped");
            }
        }
    }
}

/// Outcome of a write that must never fail the caller's primary flow.
///
/// The error side is only ever logged; callers decide whether they care
/// about the written value.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum BestEffort<T> {
    Written(T),
    Dropped(String),
}

impl<T> BestEffort<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            BestEffort::Written(value) => Some(value),
            BestEffort::Dropped(_) => None,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, BestEffort::Written(_))
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, BestEffort::Dropped(_))
    }
}
