//! Service layer for the authentication-defense subsystem
//!
//! Each service wraps one concern and talks to storage only through the
//! repository traits:
//!
//! - [`RateLimitService`]: generic per-category attempt tracker
//! - [`LoginDefenseService`]: failed-login tracking with a lockout phase
//! - [`AccountLockService`]: durable lock state on user records
//! - [`SecurityIncidentService`]: the durable incident log
//! - [`AuditLogger`]: best-effort structured audit events

pub mod account_lock;
pub mod audit;
pub mod incident;
pub mod login_defense;
pub mod rate_limit;

pub use account_lock::{AccountLockConfig, AccountLockService, LockDuration, LockRequest};
pub use audit::{
    AuditEvent, AuditLogger, AuditOutcome, AuditSink, AuditSinkError, BestEffort,
    TracingAuditSink,
};
pub use incident::SecurityIncidentService;
pub use login_defense::LoginDefenseService;
pub use rate_limit::RateLimitService;
