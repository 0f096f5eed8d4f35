use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    incident::{IncidentFilter, IncidentStatistics, NewIncident, SecurityIncident},
};

/// Repository for the append-mostly security incident log.
///
/// Implementations serialize `metadata` to an opaque string column and
/// deserialize it transparently on read.
#[async_trait]
pub trait IncidentRepository: Send + Sync + 'static {
    async fn create(&self, incident: NewIncident) -> Result<SecurityIncident, Error>;

    async fn find_by_id(&self, id: &str) -> Result<Option<SecurityIncident>, Error>;

    /// Matching incidents ordered newest first, honouring `limit`/`offset`.
    async fn find_many(&self, filter: &IncidentFilter) -> Result<Vec<SecurityIncident>, Error>;

    /// Total matching incidents, ignoring `limit`/`offset`.
    async fn count(&self, filter: &IncidentFilter) -> Result<u64, Error>;

    /// Resolve the incident if it is still unresolved.
    ///
    /// Returns the updated incident when this call performed the transition,
    /// and `None` when the incident is missing or was already resolved.
    async fn mark_resolved(
        &self,
        id: &str,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SecurityIncident>, Error>;

    /// Totals plus group-by counts over type and severity.
    async fn statistics(&self) -> Result<IncidentStatistics, Error>;
}
