//! Core types and services for bulwark
//!
//! bulwark is the authentication-defense layer of a web application: it
//! throttles repeated attempts, escalates repeated login failures into
//! account locks, and keeps a durable log of security incidents.
//!
//! This crate holds everything that does not depend on a particular storage
//! backend or web framework:
//!
//! - domain types: [`User`] with its [`LockState`], [`incident::SecurityIncident`],
//!   and the rate-limit policy table in [`rate_limit`]
//! - storage traits in [`repositories`], plus the in-process attempt store
//! - the services in [`services`]
//!
//! Most applications use the `bulwark` facade crate instead of wiring these
//! services by hand.
pub mod context;
pub mod error;
pub mod id;
pub mod incident;
pub mod rate_limit;
pub mod repositories;
pub mod services;
pub mod user;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use context::RequestContext;
pub use error::Error;
pub use incident::{
    IncidentFilter, IncidentPage, IncidentStatistics, IncidentType, NewIncident,
    SecurityIncident, Severity,
};
pub use rate_limit::{
    FailedLoginStatus, LoginDefenseConfig, LoginRateLimitStatus, RateLimitCategory,
    RateLimitDecision, RateLimitPolicies, RateLimitPolicy,
};
pub use repositories::{AttemptStore, InMemoryAttemptStore};
pub use services::{AccountLockConfig, AuditSink, BestEffort, LockRequest};
pub use user::{LockState, NewUser, User, UserId};
