use async_trait::async_trait;
use bulwark_core::{
    Error, UserId,
    error::{IncidentError, StorageError, utilities::DatabaseResultExt},
    incident::{
        IncidentFilter, IncidentStatistics, IncidentType, NewIncident, SecurityIncident, Severity,
    },
    repositories::IncidentRepository,
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::user::from_timestamp;

pub struct SqliteIncidentRepository {
    pool: SqlitePool,
}

impl SqliteIncidentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteIncident {
    id: String,
    incident_type: String,
    severity: String,
    description: String,
    metadata: Option<String>,
    user_id: Option<String>,
    username: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: i64,
    resolved: bool,
    resolved_at: Option<i64>,
    resolved_by: Option<String>,
}

impl TryFrom<SqliteIncident> for SecurityIncident {
    type Error = Error;

    fn try_from(row: SqliteIncident) -> Result<Self, Self::Error> {
        let incident_type: IncidentType = row
            .incident_type
            .parse()
            .map_err(|e| StorageError::Database(format!("Corrupt incident row {}: {e}", row.id)))?;
        let severity: Severity = row
            .severity
            .parse()
            .map_err(|e| StorageError::Database(format!("Corrupt incident row {}: {e}", row.id)))?;
        let metadata = match row.metadata.as_deref() {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| IncidentError::Metadata(format!("{}: {e}", row.id)))?,
            None => serde_json::Value::Null,
        };

        Ok(SecurityIncident {
            id: row.id,
            incident_type,
            severity,
            description: row.description,
            metadata,
            user_id: row.user_id.map(UserId::from),
            username: row.username,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: from_timestamp(row.created_at)?,
            resolved: row.resolved,
            resolved_at: row.resolved_at.map(from_timestamp).transpose()?,
            resolved_by: row.resolved_by,
        })
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &IncidentFilter) {
    builder.push(" WHERE 1 = 1");

    if let Some(incident_type) = filter.incident_type {
        builder
            .push(" AND incident_type = ")
            .push_bind(incident_type.as_str());
    }
    if let Some(severity) = filter.severity {
        builder.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(resolved) = filter.resolved {
        builder.push(" AND resolved = ").push_bind(resolved);
    }
    // Stored times are whole seconds; round the bounds inward so the SQL
    // agrees with `IncidentFilter::matches` on the rows it returns.
    if let Some(after) = filter.created_after {
        let after_secs = after.timestamp() + i64::from(after.timestamp_subsec_nanos() > 0);
        builder.push(" AND created_at >= ").push_bind(after_secs);
    }
    if let Some(before) = filter.created_before {
        builder.push(" AND created_at <= ").push_bind(before.timestamp());
    }
}

#[async_trait]
impl IncidentRepository for SqliteIncidentRepository {
    async fn create(&self, incident: NewIncident) -> Result<SecurityIncident, Error> {
        let metadata = match &incident.metadata {
            serde_json::Value::Null => None,
            value => Some(
                serde_json::to_string(value)
                    .map_err(|e| IncidentError::Metadata(e.to_string()))?,
            ),
        };

        let row = sqlx::query_as::<_, SqliteIncident>(
            r#"
            INSERT INTO security_incidents
                (id, incident_type, severity, description, metadata, user_id, username,
                 ip_address, user_agent, created_at, resolved)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)
            RETURNING *
            "#,
        )
        .bind(&incident.id)
        .bind(incident.incident_type.as_str())
        .bind(incident.severity.as_str())
        .bind(&incident.description)
        .bind(metadata)
        .bind(incident.user_id.as_ref().map(|id| id.as_str()))
        .bind(&incident.username)
        .bind(&incident.ip_address)
        .bind(&incident.user_agent)
        .bind(incident.created_at.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create security incident");
            StorageError::Database("Failed to create security incident".to_string())
        })?;

        row.try_into()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SecurityIncident>, Error> {
        let row = sqlx::query_as::<_, SqliteIncident>(
            "SELECT * FROM security_incidents WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to find security incident")?;

        row.map(SecurityIncident::try_from).transpose()
    }

    async fn find_many(&self, filter: &IncidentFilter) -> Result<Vec<SecurityIncident>, Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM security_incidents");
        push_filters(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset));

        let rows = builder
            .build_query_as::<SqliteIncident>()
            .fetch_all(&self.pool)
            .await
            .map_db_err_with_context("Failed to query security incidents")?;

        rows.into_iter().map(SecurityIncident::try_from).collect()
    }

    async fn count(&self, filter: &IncidentFilter) -> Result<u64, Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM security_incidents");
        push_filters(&mut builder, filter);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_db_err_with_context("Failed to count security incidents")?;

        Ok(count as u64)
    }

    async fn mark_resolved(
        &self,
        id: &str,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SecurityIncident>, Error> {
        let row = sqlx::query_as::<_, SqliteIncident>(
            r#"
            UPDATE security_incidents
            SET resolved = 1, resolved_at = ?2, resolved_by = ?3
            WHERE id = ?1 AND resolved = 0
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(resolved_at.timestamp())
        .bind(resolved_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, incident_id = id, "Failed to resolve security incident");
            StorageError::Database("Failed to resolve security incident".to_string())
        })?;

        row.map(SecurityIncident::try_from).transpose()
    }

    async fn statistics(&self) -> Result<IncidentStatistics, Error> {
        let (total, unresolved): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN resolved = 0 THEN 1 ELSE 0 END), 0)
            FROM security_incidents
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_db_err_with_context("Failed to count security incidents")?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT incident_type, COUNT(*) FROM security_incidents GROUP BY incident_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to group security incidents by type")?;

        let by_severity: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, COUNT(*) FROM security_incidents GROUP BY severity",
        )
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to group security incidents by severity")?;

        let mut stats = IncidentStatistics {
            total: total as u64,
            unresolved: unresolved as u64,
            ..Default::default()
        };

        for (raw, count) in by_type {
            match raw.parse::<IncidentType>() {
                Ok(incident_type) => {
                    stats.by_type.insert(incident_type, count as u64);
                }
                Err(_) => tracing::warn!(incident_type = %raw, "Skipping unknown incident type"),
            }
        }
        for (raw, count) in by_severity {
            match raw.parse::<Severity>() {
                Ok(severity) => {
                    stats.by_severity.insert(severity, count as u64);
                }
                Err(_) => tracing::warn!(severity = %raw, "Skipping unknown severity"),
            }
        }

        Ok(stats)
    }
}
