//! Generic fixed-window rate limiting.
//!
//! # Example
//!
//! ```rust,ignore
//! use bulwark_core::services::RateLimitService;
//! use bulwark_core::rate_limit::RateLimitCategory;
//!
//! let decision = service.check("203.0.113.7", RateLimitCategory::Upload).await?;
//! if decision.allowed {
//!     service.record("203.0.113.7", RateLimitCategory::Upload).await?;
//! }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::{
    Error,
    rate_limit::{
        AttemptKey, AttemptRecord, RateLimitCategory, RateLimitDecision, RateLimitPolicies,
        RateLimitPolicy, seconds_until,
    },
    repositories::AttemptStore,
    services::audit::{AuditEvent, AuditLogger, AuditOutcome},
    validation::validate_identifier,
};

/// Recorded operations between opportunistic sweeps.
pub const SWEEP_EVERY: u64 = 100;

/// Period of the optional background sweep.
pub const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Counts writes and tells the caller when to purge expired records.
#[derive(Debug)]
pub(crate) struct SweepSchedule {
    ops: AtomicU64,
    every: u64,
}

impl SweepSchedule {
    pub(crate) fn new(every: u64) -> Self {
        Self {
            ops: AtomicU64::new(0),
            every: every.max(1),
        }
    }

    /// Purge expired records on every `every`th call. Sweep failures are logged only.
    pub(crate) async fn after_write(&self, store: &dyn AttemptStore, now: DateTime<Utc>) {
        let ops = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        if ops % self.every != 0 {
            return;
        }

        match store.purge_expired(now).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "Purged expired attempt records"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge expired attempt records"),
        }
    }
}

/// The attempt tracker: per-category, per-identifier fixed-window counters.
pub struct RateLimitService {
    store: Arc<dyn AttemptStore>,
    policies: RateLimitPolicies,
    audit: AuditLogger,
    sweep: SweepSchedule,
}

impl RateLimitService {
    pub fn new(store: Arc<dyn AttemptStore>, policies: RateLimitPolicies, audit: AuditLogger) -> Self {
        Self {
            store,
            policies,
            audit,
            sweep: SweepSchedule::new(SWEEP_EVERY),
        }
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    /// Whether `identifier` may proceed in `category`. Does not consume a slot.
    pub async fn check(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<RateLimitDecision, Error> {
        validate_identifier(identifier)?;

        let policy = self.policies.policy(category);
        let key = AttemptKey::new(category, identifier);
        let now = Utc::now();

        let record = self.store.get(&key).await?;
        Ok(decide(record.as_ref(), &policy, now))
    }

    /// Count one event against `identifier`, opening a fresh window if needed.
    ///
    /// Returns the state a subsequent [`check`](Self::check) would report.
    pub async fn record(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<RateLimitDecision, Error> {
        validate_identifier(identifier)?;

        let policy = self.policies.policy(category);
        let key = AttemptKey::new(category, identifier);
        let now = Utc::now();

        let record = self.store.increment(&key, policy.window, now).await?;
        self.sweep.after_write(self.store.as_ref(), now).await;

        Ok(decide(Some(&record), &policy, now))
    }

    /// Atomically take a slot if one is free.
    ///
    /// Unlike `check` followed by `record`, two concurrent callers can never
    /// both take the last slot.
    pub async fn consume(
        &self,
        identifier: &str,
        category: RateLimitCategory,
    ) -> Result<RateLimitDecision, Error> {
        validate_identifier(identifier)?;

        let policy = self.policies.policy(category);
        let key = AttemptKey::new(category, identifier);
        let now = Utc::now();

        let record = self.store.increment(&key, policy.window, now).await?;
        self.sweep.after_write(self.store.as_ref(), now).await;

        let lockout = record.locked_until.filter(|until| *until > now);
        let allowed = record.count <= policy.max_count && lockout.is_none();

        if !allowed && record.count == policy.max_count.saturating_add(1) {
            self.audit.log(
                AuditEvent::new("rate_limit.exceeded", AuditOutcome::Denied)
                    .identifier(identifier)
                    .details(json!({
                        "category": category.as_str(),
                        "max_count": policy.max_count,
                        "window_seconds": policy.window.num_seconds(),
                    })),
            );
        }

        let reset_at = lockout.unwrap_or(record.window_reset_at);
        Ok(RateLimitDecision {
            allowed,
            remaining: policy.max_count.saturating_sub(record.count),
            reset_at,
            retry_after_seconds: (!allowed).then(|| seconds_until(reset_at, now)),
        })
    }

    /// Forget everything recorded for `identifier` in `category`.
    pub async fn reset(&self, identifier: &str, category: RateLimitCategory) -> Result<(), Error> {
        validate_identifier(identifier)?;

        let key = AttemptKey::new(category, identifier);
        if self.store.remove(&key).await? {
            tracing::debug!(key = %key, "Reset rate limit");
        }
        Ok(())
    }

    /// Drop every record whose window has passed and that carries no live lock.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        self.store.purge_expired(Utc::now()).await
    }

    /// Start a periodic sweep that runs until `shutdown` changes.
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(CLEANUP_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match store.purge_expired(Utc::now()).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(count = count, "Cleaned up expired attempt records");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to clean up attempt records");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down attempt tracker cleanup task");
                        break;
                    }
                }
            }
        })
    }
}

fn decide(
    record: Option<&AttemptRecord>,
    policy: &RateLimitPolicy,
    now: DateTime<Utc>,
) -> RateLimitDecision {
    let fresh = || RateLimitDecision {
        allowed: true,
        remaining: policy.max_count,
        reset_at: now + policy.window,
        retry_after_seconds: None,
    };

    let Some(record) = record else {
        return fresh();
    };

    if let Some(until) = record.locked_until.filter(|until| *until > now) {
        return RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at: until,
            retry_after_seconds: Some(seconds_until(until, now)),
        };
    }

    if record.is_expired(now) {
        return fresh();
    }

    let allowed = record.count < policy.max_count;
    RateLimitDecision {
        allowed,
        remaining: policy.max_count.saturating_sub(record.count),
        reset_at: record.window_reset_at,
        retry_after_seconds: (!allowed).then(|| seconds_until(record.window_reset_at, now)),
    }
}
