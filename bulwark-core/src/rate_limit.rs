//! Rate-limit policy table and the records the attempt tracker keeps.
//!
//! Thresholds live in one closed table ([`RateLimitCategory`] →
//! [`RateLimitPolicy`]) so they can be audited in a single place. Hosts may
//! override individual rows through [`RateLimitPolicies`].

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// What a counter is counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitCategory {
    Login,
    Api,
    Upload,
    ContactForm,
}

impl RateLimitCategory {
    pub const ALL: [RateLimitCategory; 4] = [
        RateLimitCategory::Login,
        RateLimitCategory::Api,
        RateLimitCategory::Upload,
        RateLimitCategory::ContactForm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitCategory::Login => "login",
            RateLimitCategory::Api => "api",
            RateLimitCategory::Upload => "upload",
            RateLimitCategory::ContactForm => "contact-form",
        }
    }

    /// Built-in thresholds.
    pub fn default_policy(&self) -> RateLimitPolicy {
        match self {
            RateLimitCategory::Login => RateLimitPolicy::new(5, Duration::minutes(15)),
            RateLimitCategory::Api => RateLimitPolicy::new(100, Duration::minutes(1)),
            RateLimitCategory::Upload => RateLimitPolicy::new(10, Duration::minutes(1)),
            RateLimitCategory::ContactForm => RateLimitPolicy::new(5, Duration::hours(1)),
        }
    }
}

impl fmt::Display for RateLimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RateLimitCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidField(format!("Unknown rate limit category: {s}")))
    }
}

/// `max_count` events per fixed `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_count: u32,
    #[serde(with = "duration_secs")]
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_count: u32, window: Duration) -> Self {
        Self { max_count, window }
    }
}

/// The policy table, with optional per-category overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitPolicies {
    #[serde(default)]
    overrides: HashMap<RateLimitCategory, RateLimitPolicy>,
}

impl RateLimitPolicies {
    pub fn with_override(mut self, category: RateLimitCategory, policy: RateLimitPolicy) -> Self {
        self.overrides.insert(category, policy);
        self
    }

    pub fn set(&mut self, category: RateLimitCategory, policy: RateLimitPolicy) {
        self.overrides.insert(category, policy);
    }

    /// Resolved at call time so overrides apply immediately.
    pub fn policy(&self, category: RateLimitCategory) -> RateLimitPolicy {
        self.overrides
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_policy())
    }
}

/// Store key, rendered as `category:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub category: RateLimitCategory,
    pub identifier: String,
}

impl AttemptKey {
    pub fn new(category: RateLimitCategory, identifier: impl Into<String>) -> Self {
        Self {
            category,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.identifier)
    }
}

/// One fixed-window counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
    /// Only ever set for [`RateLimitCategory::Login`].
    pub locked_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    pub fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 0,
            window_reset_at: now + window,
            locked_until: None,
        }
    }

    pub fn is_window_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_reset_at
    }

    /// Safe to discard. A record carrying a lock lives exactly as long as the
    /// lock; one without a lock lives until its window closes.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.locked_until {
            Some(until) => until <= now,
            None => self.is_window_expired(now),
        }
    }
}

/// Result of a generic rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_seconds: Option<i64>,
}

/// Whole seconds until `until`, rounded up. Never negative.
pub fn seconds_until(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (until - now).num_milliseconds().max(0);
    (millis + 999) / 1000
}

/// Configuration for the login-specific tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginDefenseConfig {
    /// Whether login defense is active at all
    pub enabled: bool,
    /// Failures tolerated inside one window before the identifier locks
    pub max_attempts: u32,
    /// Length of the counting window
    #[serde(with = "duration_secs")]
    pub attempt_window: Duration,
    /// How long a tripped identifier stays locked
    #[serde(with = "duration_secs")]
    pub lockout_duration: Duration,
}

impl Default for LoginDefenseConfig {
    fn default() -> Self {
        let login = RateLimitCategory::Login.default_policy();
        Self {
            enabled: true,
            max_attempts: login.max_count,
            attempt_window: login.window,
            lockout_duration: Duration::minutes(15),
        }
    }
}

impl LoginDefenseConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Answer to "may this identifier attempt a login now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRateLimitStatus {
    pub identifier: String,
    pub allowed: bool,
    pub remaining_attempts: Option<u32>,
    pub lockout_until: Option<DateTime<Utc>>,
}

impl LoginRateLimitStatus {
    pub fn retry_after_seconds(&self) -> Option<i64> {
        self.lockout_until
            .map(|until| seconds_until(until, Utc::now()))
    }
}

/// State after recording a failed login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLoginStatus {
    pub identifier: String,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// This call is the one that tripped the lock
    pub newly_locked: bool,
}

impl FailedLoginStatus {
    pub fn is_locked(&self) -> bool {
        self.locked_until.is_some()
    }
}

/// Serialize `chrono::Duration` as whole seconds in config files.
pub mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        Duration::try_seconds(seconds)
            .ok_or_else(|| serde::de::Error::custom(format!("duration out of range: {seconds}s")))
    }
}
