//! Incident writes failing must never change what the caller sees.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bulwark::{
    AuditEvent, AuditSink, AuditSinkError, BulwarkBuilder, BulwarkError, CoreError as Error,
    CredentialVerifier, IncidentFilter, IncidentStatistics, LockRequest, LoginOutcome, NewIncident,
    NewUser, RepositoryProvider, RequestContext, SecurityIncident, SqliteRepositoryProvider, User,
};
use bulwark_core::{
    error::StorageError,
    repositories::{IncidentRepository, IncidentRepositoryProvider, UserRepositoryProvider},
};
use bulwark_storage_sqlite::SqliteUserRepository;
use chrono::{DateTime, Utc};

struct FailingIncidents {
    attempts: AtomicUsize,
}

impl FailingIncidents {
    fn unavailable() -> Error {
        StorageError::Database("incident store unavailable".to_string()).into()
    }
}

#[async_trait]
impl IncidentRepository for FailingIncidents {
    async fn create(&self, _incident: NewIncident) -> Result<SecurityIncident, Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Self::unavailable())
    }

    async fn find_by_id(&self, _id: &str) -> Result<Option<SecurityIncident>, Error> {
        Err(Self::unavailable())
    }

    async fn find_many(&self, _filter: &IncidentFilter) -> Result<Vec<SecurityIncident>, Error> {
        Err(Self::unavailable())
    }

    async fn count(&self, _filter: &IncidentFilter) -> Result<u64, Error> {
        Err(Self::unavailable())
    }

    async fn mark_resolved(
        &self,
        _id: &str,
        _resolved_by: &str,
        _resolved_at: DateTime<Utc>,
    ) -> Result<Option<SecurityIncident>, Error> {
        Err(Self::unavailable())
    }

    async fn statistics(&self) -> Result<IncidentStatistics, Error> {
        Err(Self::unavailable())
    }
}

/// SQLite for users, a broken store for incidents.
struct HalfBrokenProvider {
    sqlite: SqliteRepositoryProvider,
    incidents: Arc<FailingIncidents>,
}

impl UserRepositoryProvider for HalfBrokenProvider {
    type UserRepo = SqliteUserRepository;

    fn user(&self) -> Arc<Self::UserRepo> {
        self.sqlite.user()
    }
}

impl IncidentRepositoryProvider for HalfBrokenProvider {
    type IncidentRepo = FailingIncidents;

    fn incident(&self) -> Arc<Self::IncidentRepo> {
        Arc::clone(&self.incidents)
    }
}

#[async_trait]
impl RepositoryProvider for HalfBrokenProvider {
    async fn migrate(&self) -> Result<(), Error> {
        self.sqlite.migrate().await
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.sqlite.health_check().await
    }
}

#[derive(Default)]
struct CountingSink {
    write_failures: AtomicUsize,
}

impl AuditSink for CountingSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        if event.action == "incident.write_failed" {
            self.write_failures.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct StaticPassword(&'static str);

#[async_trait]
impl CredentialVerifier for StaticPassword {
    async fn verify(&self, _user: &User, password: &str) -> Result<bool, BulwarkError> {
        Ok(password == self.0)
    }
}

async fn setup() -> (
    bulwark::Bulwark<HalfBrokenProvider>,
    Arc<FailingIncidents>,
    Arc<CountingSink>,
) {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    let incidents = Arc::new(FailingIncidents {
        attempts: AtomicUsize::new(0),
    });
    let sink = Arc::new(CountingSink::default());

    let provider = Arc::new(HalfBrokenProvider {
        sqlite: SqliteRepositoryProvider::new(pool),
        incidents: Arc::clone(&incidents),
    });

    let bulwark = BulwarkBuilder::new()
        .with_repositories(provider)
        .with_audit_sink(sink.clone())
        .apply_migrations(true)
        .build()
        .await
        .unwrap();

    (bulwark, incidents, sink)
}

#[tokio::test]
async fn test_create_returns_none_on_failure() {
    let (bulwark, incidents, sink) = setup().await;

    let created = bulwark
        .create_security_incident(
            NewIncident::builder(bulwark::IncidentType::AdminAction, "Settings changed").build(),
        )
        .await;

    assert!(created.is_none());
    assert_eq!(incidents.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(sink.write_failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_login_flow_survives_incident_outage() {
    let (bulwark, incidents, _sink) = setup().await;
    let verifier = StaticPassword("pw");
    let alice = bulwark.create_user(NewUser::new("alice")).await.unwrap();
    let context = RequestContext::default();

    let outcome = bulwark
        .authenticate("alice", "pw", &context, &verifier)
        .await
        .unwrap();
    assert!(outcome.is_success());

    for _ in 0..5 {
        let outcome = bulwark
            .authenticate("alice", "nope", &context, &verifier)
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::InvalidCredentials { .. }));
    }

    // Lockout still enforced, both in memory and durably.
    let status = bulwark.check_login_rate_limit("alice").await.unwrap();
    assert!(!status.allowed);
    let stored = bulwark.get_user(&alice.id).await.unwrap().unwrap();
    assert!(bulwark.is_account_locked(&stored));

    assert!(incidents.attempts.load(Ordering::SeqCst) >= 6);
}

#[tokio::test]
async fn test_admin_lock_survives_incident_outage() {
    let (bulwark, _incidents, _sink) = setup().await;
    let bob = bulwark.create_user(NewUser::new("bob")).await.unwrap();

    let locked = bulwark
        .lock_account(&LockRequest::new(bob.id.clone()).locked_by("admin-1"))
        .await
        .unwrap();
    assert!(bulwark.is_account_locked(&locked));

    let unlocked = bulwark.unlock_account(&bob.id, Some("admin-1")).await.unwrap();
    assert!(!bulwark.is_account_locked(&unlocked));
}

#[tokio::test]
async fn test_queries_do_surface_storage_errors() {
    let (bulwark, _incidents, _sink) = setup().await;

    let err = bulwark
        .get_security_incidents(&IncidentFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BulwarkError::Core(e) if e.is_storage_error()));
}
