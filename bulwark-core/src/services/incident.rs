//! Security incident recording.
//!
//! Writes through [`SecurityIncidentService::record`] are best-effort: a
//! failing incident store is logged and reported as [`BestEffort::Dropped`],
//! never as an error, so the audit trail can't abort the flow it describes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::{
    Error,
    error::{IncidentError, ValidationError},
    incident::{IncidentFilter, IncidentPage, IncidentStatistics, NewIncident, SecurityIncident},
    repositories::IncidentRepository,
    services::audit::{AuditEvent, AuditLogger, AuditOutcome, BestEffort},
    validation::validate_actor,
};

/// Largest page a single query may request.
pub const MAX_PAGE_SIZE: u32 = 500;

pub struct SecurityIncidentService<R: IncidentRepository> {
    repository: Arc<R>,
    audit: AuditLogger,
}

impl<R: IncidentRepository> SecurityIncidentService<R> {
    pub fn new(repository: Arc<R>, audit: AuditLogger) -> Self {
        Self { repository, audit }
    }

    /// Persist an incident. Never fails.
    pub async fn record(&self, incident: NewIncident) -> BestEffort<SecurityIncident> {
        let incident_type = incident.incident_type;

        match self.repository.create(incident).await {
            Ok(created) => {
                tracing::debug!(
                    incident_id = %created.id,
                    incident_type = %created.incident_type,
                    severity = %created.severity,
                    "Recorded security incident"
                );
                BestEffort::Written(created)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    incident_type = %incident_type,
                    "Failed to record security incident"
                );
                self.audit.log(
                    AuditEvent::new("incident.write_failed", AuditOutcome::Failure).details(json!({
                        "incident_type": incident_type.as_str(),
                        "error": e.to_string(),
                    })),
                );
                BestEffort::Dropped(e.to_string())
            }
        }
    }

    /// One page of matching incidents, newest first, with the total count.
    pub async fn query(&self, filter: &IncidentFilter) -> Result<IncidentPage, Error> {
        if filter.limit == 0 {
            return Err(ValidationError::InvalidField("limit must be at least 1".to_string()).into());
        }
        if let (Some(after), Some(before)) = (filter.created_after, filter.created_before)
            && after > before
        {
            return Err(ValidationError::InvalidField(
                "created_after must not be later than created_before".to_string(),
            )
            .into());
        }

        let mut filter = filter.clone();
        filter.limit = filter.limit.min(MAX_PAGE_SIZE);

        let (incidents, total) = tokio::try_join!(
            self.repository.find_many(&filter),
            self.repository.count(&filter)
        )?;

        Ok(IncidentPage { incidents, total })
    }

    /// Mark an incident resolved.
    ///
    /// The first resolution wins: resolving an already-resolved incident
    /// returns it unchanged and emits nothing.
    pub async fn resolve(&self, id: &str, resolved_by: &str) -> Result<SecurityIncident, Error> {
        validate_actor(resolved_by)?;

        if let Some(resolved) = self
            .repository
            .mark_resolved(id, resolved_by, Utc::now())
            .await?
        {
            self.audit.log(
                AuditEvent::new("incident.resolved", AuditOutcome::Success)
                    .actor(Some(resolved_by))
                    .details(json!({
                        "incident_id": resolved.id,
                        "incident_type": resolved.incident_type.as_str(),
                    })),
            );
            return Ok(resolved);
        }

        match self.repository.find_by_id(id).await? {
            Some(existing) => {
                tracing::debug!(incident_id = %id, "Incident already resolved");
                Ok(existing)
            }
            None => Err(IncidentError::NotFound(id.to_string()).into()),
        }
    }

    pub async fn statistics(&self) -> Result<IncidentStatistics, Error> {
        self.repository.statistics().await
    }
}
