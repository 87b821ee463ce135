//! Persisted rate limit records with repair-on-read.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{
    EXPIRED_LOCKOUT_RETENTION, RateLimitConfig, RateLimitEntry, delta, repair,
};
use crate::ports::{Clock, Storage, StorageError};

/// Result of a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub scanned: usize,
    pub removed: usize,
}

/// Stores one [`RateLimitEntry`] per (action, client id).
///
/// Every read discards stale records and repairs invariant violations, so
/// callers never observe a corrupted record. Storage failures are logged and
/// swallowed: reads fall back to a fresh record, writes are best-effort.
pub struct PersistedEntryStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl PersistedEntryStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read the record for a client, creating a fresh one if absent.
    pub async fn get(&self, config: &RateLimitConfig, client_id: &str) -> RateLimitEntry {
        self.get_at(config, client_id, self.now()).await
    }

    /// Like [`get`](Self::get), judged at `now`.
    ///
    /// Callers that go on to evaluate or update the record must pass the
    /// same instant they use for that, or a lockout ending in between is
    /// seen as both active and expired.
    pub async fn get_at(
        &self,
        config: &RateLimitConfig,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> RateLimitEntry {
        let key = config.storage_key(client_id);

        let raw = match self.storage.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return RateLimitEntry::fresh(now),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Rate limit storage read failed, failing open");
                return RateLimitEntry::fresh(now);
            }
        };

        let entry = match serde_json::from_str::<RateLimitEntry>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable rate limit record");
                self.remove(&key).await;
                return RateLimitEntry::fresh(now);
            }
        };

        if entry.is_stale(now) {
            tracing::debug!(key = %key, last_attempt = %entry.last_attempt, "Discarding stale rate limit record");
            self.remove(&key).await;
            return RateLimitEntry::fresh(now);
        }

        let repair = repair(&entry, now, config);
        if !repair.corruptions.is_empty() {
            tracing::warn!(
                key = %key,
                corruptions = ?repair.corruptions,
                attempts = entry.attempts,
                lockout_level = entry.lockout_level,
                "Repaired corrupted rate limit record"
            );
        } else if repair.lockout_expired {
            tracing::debug!(key = %key, lockout_level = entry.lockout_level, "Lockout expired");
        }

        if repair.changed() {
            self.set(config, client_id, &repair.entry).await;
        }

        repair.entry
    }

    /// Persist a record. Failures are logged, never returned.
    pub async fn set(&self, config: &RateLimitConfig, client_id: &str, entry: &RateLimitEntry) {
        let key = config.storage_key(client_id);
        if let Err(e) = self.try_set(&key, entry).await {
            tracing::warn!(key = %key, error = %e, "Rate limit storage write failed");
        }
    }

    /// Forget a client's record.
    pub async fn clear(&self, config: &RateLimitConfig, client_id: &str) {
        self.remove(&config.storage_key(client_id)).await;
    }

    /// Remove records that are stale, undecodable, or whose lockout ended
    /// more than an hour ago.
    pub async fn prune_expired<'a>(
        &self,
        configs: impl IntoIterator<Item = &'a RateLimitConfig>,
    ) -> PruneReport {
        let now = self.now();
        let mut report = PruneReport::default();

        for config in configs {
            let namespace = config.storage_namespace();
            let keys = match self.storage.keys(namespace).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(namespace = %namespace, error = %e, "Failed to list rate limit records");
                    continue;
                }
            };

            for key in keys {
                report.scanned += 1;
                let raw = match self.storage.get(&key).await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to read rate limit record");
                        continue;
                    }
                };

                let expired = match serde_json::from_str::<RateLimitEntry>(&raw) {
                    Ok(entry) => Self::is_prunable(&entry, now),
                    Err(_) => true,
                };

                if expired && self.storage.remove(&key).await.is_ok() {
                    report.removed += 1;
                }
            }
        }

        tracing::info!(scanned = report.scanned, removed = report.removed, "Pruned rate limit records");
        report
    }

    fn is_prunable(entry: &RateLimitEntry, now: DateTime<Utc>) -> bool {
        entry.is_stale(now)
            || entry
                .lockout_until
                .is_some_and(|until| now - until > delta(EXPIRED_LOCKOUT_RETENTION))
    }

    async fn try_set(&self, key: &str, entry: &RateLimitEntry) -> Result<(), StorageError> {
        let raw =
            serde_json::to_string(entry).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.storage.set(key, &raw).await
    }

    async fn remove(&self, key: &str) {
        if let Err(e) = self.storage.remove(key).await {
            tracing::warn!(key = %key, error = %e, "Rate limit storage remove failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActionKind;
    use crate::services::test_support::{FailingStorage, MapStorage, start};
    use crate::ports::ManualClock;
    use chrono::TimeDelta;
    use std::time::Duration;

    fn setup() -> (Arc<MapStorage>, Arc<ManualClock>, PersistedEntryStore) {
        let storage = Arc::new(MapStorage::default());
        let clock = Arc::new(ManualClock::new(start()));
        let store = PersistedEntryStore::new(storage.clone(), clock.clone());
        (storage, clock, store)
    }

    fn login() -> RateLimitConfig {
        RateLimitConfig::for_action(ActionKind::Login)
    }

    #[tokio::test]
    async fn test_missing_record_is_fresh() {
        let (storage, _, store) = setup();
        let entry = store.get(&login(), "client").await;

        assert_eq!(entry, RateLimitEntry::fresh(start()));
        assert!(storage.raw("rate_limit_login_client").is_none());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (storage, _, store) = setup();
        let entry = RateLimitEntry {
            attempts: 2,
            last_attempt: start(),
            lockout_until: None,
            lockout_level: 1,
        };

        store.set(&login(), "client", &entry).await;
        assert!(storage.raw("rate_limit_login_client").is_some());
        assert_eq!(store.get(&login(), "client").await, entry);
    }

    #[tokio::test]
    async fn test_corruption_repaired_and_persisted() {
        let (storage, _, store) = setup();
        storage.insert(
            "rate_limit_login_client",
            &format!(
                r#"{{"attempts":15,"lastAttempt":{},"lockoutLevel":0}}"#,
                start().timestamp_millis()
            ),
        );

        let entry = store.get(&login(), "client").await;
        assert_eq!(entry.attempts, 0);

        let persisted: RateLimitEntry =
            serde_json::from_str(&storage.raw("rate_limit_login_client").unwrap()).unwrap();
        assert_eq!(persisted.attempts, 0);
    }

    #[tokio::test]
    async fn test_undecodable_record_removed() {
        let (storage, _, store) = setup();
        storage.insert("rate_limit_login_client", "{not json");

        let entry = store.get(&login(), "client").await;
        assert_eq!(entry.attempts, 0);
        assert!(storage.raw("rate_limit_login_client").is_none());
    }

    #[tokio::test]
    async fn test_stale_record_discarded() {
        let (storage, clock, store) = setup();
        let entry = RateLimitEntry {
            attempts: 4,
            last_attempt: start(),
            lockout_until: Some(start() + TimeDelta::seconds(600)),
            lockout_level: 5,
        };
        store.set(&login(), "client", &entry).await;

        clock.advance(Duration::from_secs(25 * 3600));
        let entry = store.get(&login(), "client").await;

        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.lockout_level, 0);
        assert!(storage.raw("rate_limit_login_client").is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_fails_open() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = PersistedEntryStore::new(Arc::new(FailingStorage), clock);

        let entry = RateLimitEntry {
            attempts: 3,
            last_attempt: start(),
            lockout_until: None,
            lockout_level: 0,
        };
        store.set(&login(), "client", &entry).await;
        store.clear(&login(), "client").await;

        assert_eq!(store.get(&login(), "client").await, RateLimitEntry::fresh(start()));
        assert_eq!(store.prune_expired([&login()]).await, PruneReport::default());
    }

    #[tokio::test]
    async fn test_clear() {
        let (storage, _, store) = setup();
        store
            .set(&login(), "client", &RateLimitEntry::fresh(start()))
            .await;
        store.clear(&login(), "client").await;
        assert!(storage.raw("rate_limit_login_client").is_none());
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let (storage, clock, store) = setup();
        let config = login();
        let registration = RateLimitConfig::for_action(ActionKind::Registration);
        let now = start();

        let old_lockout = RateLimitEntry {
            attempts: 5,
            last_attempt: now - TimeDelta::minutes(70),
            lockout_until: Some(now - TimeDelta::minutes(65)),
            lockout_level: 1,
        };
        let recent_lockout = RateLimitEntry {
            attempts: 5,
            last_attempt: now - TimeDelta::minutes(10),
            lockout_until: Some(now - TimeDelta::minutes(8)),
            lockout_level: 1,
        };
        let stale = RateLimitEntry {
            attempts: 1,
            last_attempt: now - TimeDelta::hours(30),
            lockout_until: None,
            lockout_level: 0,
        };

        store.set(&config, "old", &old_lockout).await;
        store.set(&config, "recent", &recent_lockout).await;
        store.set(&registration, "stale", &stale).await;
        storage.insert("rate_limit_login_garbage", "[]");
        storage.insert("cherut_client_id", "abc_123");

        clock.set(now);
        let report = store.prune_expired([&config, &registration]).await;

        assert_eq!(report, PruneReport { scanned: 4, removed: 3 });
        assert!(storage.raw("rate_limit_login_recent").is_some());
        assert!(storage.raw("rate_limit_login_old").is_none());
        assert!(storage.raw("rate_limit_registration_stale").is_none());
        assert!(storage.raw("cherut_client_id").is_some());
    }
}
