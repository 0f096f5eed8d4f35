//! Storage for ephemeral attempt counters.
//!
//! The attempt tracker never touches a map directly; it goes through
//! [`AttemptStore`], so a networked backend can replace the in-process
//! [`InMemoryAttemptStore`] without changing call sites.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::{
    Error,
    rate_limit::{AttemptKey, AttemptRecord},
};

/// Backend for attempt counters.
///
/// Every mutating method must be an atomic read-modify-write for its key:
/// two concurrent `increment` calls on the same key must both be counted.
#[async_trait]
pub trait AttemptStore: Send + Sync + 'static {
    /// Read a record without changing it.
    async fn get(&self, key: &AttemptKey) -> Result<Option<AttemptRecord>, Error>;

    /// Add one to the counter for `key`.
    ///
    /// When no record exists, or the stored one has expired (see
    /// [`AttemptRecord::is_expired`]), a fresh window starting at `now` is
    /// opened first, as part of the same atomic step.
    /// Returns the record as it stands after the increment.
    async fn increment(
        &self,
        key: &AttemptKey,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, Error>;

    /// Set `locked_until` on an existing record unless a live lock is already
    /// present. Returns `true` only for the call that set it.
    async fn lock_until(
        &self,
        key: &AttemptKey,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error>;

    /// Delete the record. Returns whether one existed.
    async fn remove(&self, key: &AttemptKey) -> Result<bool, Error>;

    /// Delete the record only if it is still expired at `now`. A record a
    /// concurrent `increment` has already restarted is left alone.
    async fn remove_expired(&self, key: &AttemptKey, now: DateTime<Utc>) -> Result<bool, Error>;

    /// Delete every expired record. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;

    /// Number of live records.
    async fn len(&self) -> Result<usize, Error>;
}

/// Single-process store over a sharded concurrent map.
///
/// Per-key atomicity comes from the shard lock held by `DashMap::entry`.
#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    records: DashMap<AttemptKey, AttemptRecord>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn get(&self, key: &AttemptKey) -> Result<Option<AttemptRecord>, Error> {
        Ok(self.records.get(key).map(|record| record.value().clone()))
    }

    async fn increment(
        &self,
        key: &AttemptKey,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, Error> {
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| AttemptRecord::fresh(now, window));

        if record.is_expired(now) {
            *record = AttemptRecord::fresh(now, window);
        }
        record.count = record.count.saturating_add(1);

        Ok(record.value().clone())
    }

    async fn lock_until(
        &self,
        key: &AttemptKey,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let Some(mut record) = self.records.get_mut(key) else {
            return Ok(false);
        };

        if record.locked_until.is_some_and(|existing| existing > now) {
            return Ok(false);
        }

        record.locked_until = Some(until);
        Ok(true)
    }

    async fn remove(&self, key: &AttemptKey) -> Result<bool, Error> {
        Ok(self.records.remove(key).is_some())
    }

    async fn remove_expired(&self, key: &AttemptKey, now: DateTime<Utc>) -> Result<bool, Error> {
        Ok(self
            .records
            .remove_if(key, |_, record| record.is_expired(now))
            .is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut removed = 0u64;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, Error> {
        Ok(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitCategory;
    use std::sync::Arc;

    fn key(identifier: &str) -> AttemptKey {
        AttemptKey::new(RateLimitCategory::Login, identifier)
    }

    #[tokio::test]
    async fn test_increment_creates_fresh_window() {
        let store = InMemoryAttemptStore::new();
        let now = Utc::now();

        let record = store
            .increment(&key("alice"), Duration::minutes(15), now)
            .await
            .unwrap();

        assert_eq!(record.count, 1);
        assert_eq!(record.window_reset_at, now + Duration::minutes(15));
        assert!(record.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_increment_restarts_expired_window() {
        let store = InMemoryAttemptStore::new();
        let start = Utc::now();

        for _ in 0..3 {
            store
                .increment(&key("alice"), Duration::minutes(1), start)
                .await
                .unwrap();
        }

        let later = start + Duration::minutes(2);
        let record = store
            .increment(&key("alice"), Duration::minutes(1), later)
            .await
            .unwrap();

        assert_eq!(record.count, 1);
        assert_eq!(record.window_reset_at, later + Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_increment_restarts_after_elapsed_lock() {
        let store = InMemoryAttemptStore::new();
        let start = Utc::now() - Duration::minutes(5);

        for _ in 0..5 {
            store
                .increment(&key("alice"), Duration::minutes(15), start)
                .await
                .unwrap();
        }
        store
            .lock_until(&key("alice"), start + Duration::minutes(1), start)
            .await
            .unwrap();

        let now = Utc::now();
        let record = store
            .increment(&key("alice"), Duration::minutes(15), now)
            .await
            .unwrap();

        assert_eq!(record.count, 1);
        assert!(record.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_remove_expired_spares_restarted_record() {
        let store = InMemoryAttemptStore::new();
        let start = Utc::now() - Duration::minutes(20);

        store
            .increment(&key("alice"), Duration::minutes(15), start)
            .await
            .unwrap();
        let now = Utc::now();

        // Restarted by a newer failure before the sweep got to it.
        store
            .increment(&key("alice"), Duration::minutes(15), now)
            .await
            .unwrap();
        assert!(!store.remove_expired(&key("alice"), now).await.unwrap());
        assert_eq!(store.get(&key("alice")).await.unwrap().unwrap().count, 1);

        store
            .increment(&key("bob"), Duration::minutes(15), start)
            .await
            .unwrap();
        assert!(store.remove_expired(&key("bob"), now).await.unwrap());
        assert!(store.get(&key("bob")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_until_only_first_caller_wins() {
        let store = InMemoryAttemptStore::new();
        let now = Utc::now();

        assert!(
            !store
                .lock_until(&key("ghost"), now + Duration::minutes(15), now)
                .await
                .unwrap(),
            "no record, nothing to lock"
        );

        store
            .increment(&key("alice"), Duration::minutes(15), now)
            .await
            .unwrap();
        assert!(
            store
                .lock_until(&key("alice"), now + Duration::minutes(15), now)
                .await
                .unwrap()
        );
        assert!(
            !store
                .lock_until(&key("alice"), now + Duration::minutes(30), now)
                .await
                .unwrap()
        );

        let record = store.get(&key("alice")).await.unwrap().unwrap();
        assert_eq!(record.locked_until, Some(now + Duration::minutes(15)));
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_records() {
        let store = InMemoryAttemptStore::new();
        let now = Utc::now();

        store
            .increment(&key("old"), Duration::minutes(1), now - Duration::minutes(10))
            .await
            .unwrap();
        store
            .increment(&key("fresh"), Duration::minutes(1), now)
            .await
            .unwrap();
        store
            .increment(&key("locked"), Duration::minutes(1), now - Duration::minutes(10))
            .await
            .unwrap();
        store
            .lock_until(&key("locked"), now + Duration::minutes(5), now)
            .await
            .unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 2);
        assert!(store.get(&key("old")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryAttemptStore::new());
        let now = Utc::now();

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .increment(&key("target"), Duration::minutes(15), now)
                        .await
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get(&key("target")).await.unwrap().unwrap();
        assert_eq!(record.count, 64);
    }
}
