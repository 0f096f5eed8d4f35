//! Hand-written doubles shared by the service tests.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error, LockState, User, UserId,
    error::StorageError,
    incident::{IncidentFilter, IncidentStatistics, NewIncident, SecurityIncident},
    repositories::{IncidentRepository, UserRepository},
    services::audit::{AuditEvent, AuditSink, AuditSinkError},
    user::NewUser,
};

/// Collects audit events for assertions.
#[derive(Default)]
pub struct MemoryAuditSink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn actions(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.action).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// User store that can be switched into a failing mode for lock writes.
#[derive(Default)]
pub struct MockUserRepository {
    pub users: Mutex<Vec<User>>,
    pub fail_writes: AtomicBool,
}

impl MockUserRepository {
    pub fn insert(&self, user: User) {
        self.users.lock().unwrap().push(user);
    }

    pub fn get(&self, id: &UserId) -> Option<User> {
        self.users.lock().unwrap().iter().find(|u| &u.id == id).cloned()
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(StorageError::Database(
                "users table is read-only".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, Error> {
        self.check_writable()?;
        let user = User::builder()
            .id(user.id)
            .username(user.username)
            .email(user.email)
            .build()?;
        self.insert(user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        Ok(self.get(id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn update_lock_state(&self, id: &UserId, lock: &LockState) -> Result<User, Error> {
        self.check_writable()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or(Error::Storage(StorageError::NotFound))?;
        user.lock = lock.clone();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn clear_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        self.check_writable()?;
        let mut cleared = 0;
        for user in self.users.lock().unwrap().iter_mut() {
            if user.lock.is_stale_at(now) {
                user.lock = LockState::unlocked();
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn find_locked(&self) -> Result<Vec<User>, Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.lock.locked)
            .cloned()
            .collect())
    }
}

/// Incident log kept in a vector; can be switched into a failing mode.
#[derive(Default)]
pub struct MockIncidentRepository {
    pub incidents: Mutex<Vec<SecurityIncident>>,
    pub fail_writes: AtomicBool,
}

impl MockIncidentRepository {
    pub fn failing() -> Self {
        Self {
            incidents: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(true),
        }
    }

    pub fn all(&self) -> Vec<SecurityIncident> {
        self.incidents.lock().unwrap().clone()
    }
}

#[async_trait]
impl IncidentRepository for MockIncidentRepository {
    async fn create(&self, incident: NewIncident) -> Result<SecurityIncident, Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(StorageError::Connection(
                "incident store unavailable".to_string(),
            )));
        }
        let incident: SecurityIncident = incident.into();
        self.incidents.lock().unwrap().push(incident.clone());
        Ok(incident)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SecurityIncident>, Error> {
        Ok(self.all().into_iter().find(|i| i.id == id))
    }

    async fn find_many(&self, filter: &IncidentFilter) -> Result<Vec<SecurityIncident>, Error> {
        let mut matching: Vec<_> = self
            .all()
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn count(&self, filter: &IncidentFilter) -> Result<u64, Error> {
        Ok(self.all().iter().filter(|i| filter.matches(i)).count() as u64)
    }

    async fn mark_resolved(
        &self,
        id: &str,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SecurityIncident>, Error> {
        let mut incidents = self.incidents.lock().unwrap();
        let Some(incident) = incidents.iter_mut().find(|i| i.id == id && !i.resolved) else {
            return Ok(None);
        };
        incident.resolved = true;
        incident.resolved_at = Some(resolved_at);
        incident.resolved_by = Some(resolved_by.to_string());
        Ok(Some(incident.clone()))
    }

    async fn statistics(&self) -> Result<IncidentStatistics, Error> {
        let mut stats = IncidentStatistics::default();
        for incident in self.all() {
            stats.total += 1;
            if !incident.resolved {
                stats.unresolved += 1;
            }
            *stats.by_type.entry(incident.incident_type).or_default() += 1;
            *stats.by_severity.entry(incident.severity).or_default() += 1;
        }
        Ok(stats)
    }
}
