//! Progressive lockout state machine.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{ActionKind, RateLimitConfig, RateLimitPolicies, RateLimitResult};
use crate::error::ConfigError;
use crate::presenter::RateLimitPresenter;
use crate::services::store::{PersistedEntryStore, PruneReport};

/// Entry point of the subsystem: owns the policy table and the record store
/// and hands out limiters bound to an (action, client) pair.
#[derive(Clone)]
pub struct RateLimitService {
    policies: Arc<RateLimitPolicies>,
    store: Arc<PersistedEntryStore>,
}

impl RateLimitService {
    pub fn new(policies: RateLimitPolicies, store: PersistedEntryStore) -> Self {
        Self {
            policies: Arc::new(policies),
            store: Arc::new(store),
        }
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    /// Limiter for one action category and client.
    pub fn limiter(
        &self,
        action: ActionKind,
        client_id: impl Into<String>,
    ) -> Result<RateLimiter, ConfigError> {
        let config = self.policies.get(action)?.clone();
        Ok(RateLimiter {
            action,
            presenter: RateLimitPresenter::new(config.clone()),
            config,
            client_id: client_id.into(),
            store: self.store.clone(),
        })
    }

    /// Maintenance sweep over every configured namespace.
    pub async fn prune_expired(&self) -> PruneReport {
        let configs: Vec<&RateLimitConfig> = self.policies.iter().map(|(_, config)| config).collect();
        self.store.prune_expired(configs).await
    }
}

/// Lockout state machine for one (action, client) pair.
///
/// States are Open (attempts below the limit), Locked (lockout in the
/// future), and Warning, a presentation-only refinement of Open.
/// Callers must not report a success while the limiter is locked; the
/// limiter does not refuse it, the guard simply never runs the operation.
#[derive(Clone)]
pub struct RateLimiter {
    action: ActionKind,
    config: RateLimitConfig,
    client_id: String,
    store: Arc<PersistedEntryStore>,
    presenter: RateLimitPresenter,
}

impl RateLimiter {
    pub fn action(&self) -> ActionKind {
        self.action
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn presenter(&self) -> &RateLimitPresenter {
        &self.presenter
    }

    /// Current standing. Side effects are limited to repairing or
    /// discarding the persisted record.
    pub async fn check_rate_limit(&self) -> RateLimitResult {
        self.evaluate_at(self.store.now()).await
    }

    /// Count a failed attempt, locking the client out once the limit is reached.
    pub async fn record_failure(&self) -> RateLimitResult {
        let now = self.store.now();
        let mut entry = self.store.get_at(&self.config, &self.client_id, now).await;

        if entry.is_locked(now) {
            tracing::debug!(action = %self.action, "Failure reported while locked, ignoring");
            return RateLimitResult::evaluate(&entry, &self.config, now);
        }

        if entry.register_failure(now, &self.config) {
            tracing::warn!(
                action = %self.action,
                client_id = %self.client_id,
                lockout_level = entry.lockout_level,
                lockout_secs = self.config.lockout_duration(entry.lockout_level - 1).as_secs(),
                "Lockout triggered"
            );
        } else {
            tracing::debug!(action = %self.action, attempts = entry.attempts, "Failed attempt recorded");
        }

        self.store.set(&self.config, &self.client_id, &entry).await;
        self.evaluate_at(now).await
    }

    /// Count a successful attempt.
    pub async fn record_success(&self) {
        let now = self.store.now();
        let mut entry = self.store.get_at(&self.config, &self.client_id, now).await;
        entry.register_success(now);
        tracing::debug!(action = %self.action, lockout_level = entry.lockout_level, "Successful attempt recorded");
        self.store.set(&self.config, &self.client_id, &entry).await;
    }

    /// Read the persisted record and judge it, both at `now`.
    async fn evaluate_at(&self, now: DateTime<Utc>) -> RateLimitResult {
        let entry = self.store.get_at(&self.config, &self.client_id, now).await;
        RateLimitResult::evaluate(&entry, &self.config, now)
    }

    /// Drop the record entirely, e.g. after a completed password reset.
    pub async fn clear(&self) {
        self.store.clear(&self.config, &self.client_id).await;
    }

    /// User-facing text for a result.
    pub fn get_message(&self, result: &RateLimitResult) -> String {
        self.presenter.message(result)
    }
}
