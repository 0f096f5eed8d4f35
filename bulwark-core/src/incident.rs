//! Security incidents: the durable audit trail.
//!
//! Incidents are append-mostly. The only mutation after creation is the
//! resolve transition, which sets `resolved`, `resolved_at` and `resolved_by`
//! together.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{UserId, error::ValidationError, id::generate_prefixed_id};

/// Closed set of security-relevant events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    FailedLogin,
    SuccessfulLogin,
    AccountLocked,
    AccountUnlocked,
    RateLimitExceeded,
    UnauthorizedAccessAttempt,
    PhotoUploaded,
    ContactMessageSubmitted,
    AdminAction,
}

impl IncidentType {
    pub const ALL: [IncidentType; 9] = [
        IncidentType::FailedLogin,
        IncidentType::SuccessfulLogin,
        IncidentType::AccountLocked,
        IncidentType::AccountUnlocked,
        IncidentType::RateLimitExceeded,
        IncidentType::UnauthorizedAccessAttempt,
        IncidentType::PhotoUploaded,
        IncidentType::ContactMessageSubmitted,
        IncidentType::AdminAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::FailedLogin => "failed_login",
            IncidentType::SuccessfulLogin => "successful_login",
            IncidentType::AccountLocked => "account_locked",
            IncidentType::AccountUnlocked => "account_unlocked",
            IncidentType::RateLimitExceeded => "rate_limit_exceeded",
            IncidentType::UnauthorizedAccessAttempt => "unauthorized_access_attempt",
            IncidentType::PhotoUploaded => "photo_uploaded",
            IncidentType::ContactMessageSubmitted => "contact_message_submitted",
            IncidentType::AdminAction => "admin_action",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IncidentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidField(format!("Unknown incident type: {s}")))
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|severity| severity.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidField(format!("Unknown severity: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIncident {
    pub id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub description: String,
    pub metadata: serde_json::Value,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// Payload for creating an incident. Built with [`NewIncident::builder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIncident {
    pub id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub description: String,
    pub metadata: serde_json::Value,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewIncident {
    pub fn builder(incident_type: IncidentType, description: impl Into<String>) -> NewIncidentBuilder {
        NewIncidentBuilder {
            incident_type,
            description: description.into(),
            severity: None,
            metadata: serde_json::Value::Null,
            user_id: None,
            username: None,
            ip_address: None,
            user_agent: None,
        }
    }
}

pub struct NewIncidentBuilder {
    incident_type: IncidentType,
    description: String,
    severity: Option<Severity>,
    metadata: serde_json::Value,
    user_id: Option<UserId>,
    username: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl NewIncidentBuilder {
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn user_id(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn build(self) -> NewIncident {
        NewIncident {
            id: generate_prefixed_id("inc"),
            incident_type: self.incident_type,
            severity: self.severity.unwrap_or_default(),
            description: self.description,
            metadata: self.metadata,
            user_id: self.user_id,
            username: self.username,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            created_at: Utc::now(),
        }
    }
}

impl From<NewIncident> for SecurityIncident {
    fn from(incident: NewIncident) -> Self {
        SecurityIncident {
            id: incident.id,
            incident_type: incident.incident_type,
            severity: incident.severity,
            description: incident.description,
            metadata: incident.metadata,
            user_id: incident.user_id,
            username: incident.username,
            ip_address: incident.ip_address,
            user_agent: incident.user_agent,
            created_at: incident.created_at,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        }
    }
}

/// Query filters. Unset fields do not constrain the result.
///
/// Storage backends may keep `created_at` at whole-second precision, in
/// which case the time bounds are compared against the stored second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentFilter {
    pub incident_type: Option<IncidentType>,
    pub severity: Option<Severity>,
    pub resolved: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl IncidentFilter {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn incident_type(mut self, incident_type: IncidentType) -> Self {
        self.incident_type = Some(incident_type);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Whether `incident` satisfies every set criterion. Ignores paging.
    pub fn matches(&self, incident: &SecurityIncident) -> bool {
        self.incident_type.is_none_or(|t| incident.incident_type == t)
            && self.severity.is_none_or(|s| incident.severity == s)
            && self.resolved.is_none_or(|r| incident.resolved == r)
            && self.created_after.is_none_or(|after| incident.created_at >= after)
            && self.created_before.is_none_or(|before| incident.created_at <= before)
    }
}

impl Default for IncidentFilter {
    fn default() -> Self {
        Self {
            incident_type: None,
            severity: None,
            resolved: None,
            created_after: None,
            created_before: None,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of incidents, newest first, plus the total for pagers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentPage {
    pub incidents: Vec<SecurityIncident>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentStatistics {
    pub total: u64,
    pub unresolved: u64,
    pub by_type: HashMap<IncidentType, u64>,
    pub by_severity: HashMap<Severity, u64>,
}
