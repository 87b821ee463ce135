use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ATTEMPT_SLACK, FUTURE_SKEW, RateLimitConfig, STALE_AFTER, delta};

/// Persisted rate limit record for one (action, client) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitEntry {
    /// Failures since the last reset or success.
    pub attempts: u32,
    /// Most recent recorded failure or success.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_attempt: DateTime<Utc>,
    /// Blocked until this instant, when set and in the future.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub lockout_until: Option<DateTime<Utc>>,
    /// Number of lockouts triggered so far.
    #[serde(default)]
    pub lockout_level: u32,
}

impl RateLimitEntry {
    /// A clean record, as seen on the first check for a pair.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 0,
            last_attempt: now,
            lockout_until: None,
            lockout_level: 0,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_attempt > delta(STALE_AFTER)
    }

    /// Apply a failed attempt. Returns `true` when this failure triggered a lockout.
    ///
    /// Failures while locked are not counted.
    pub fn register_failure(&mut self, now: DateTime<Utc>, config: &RateLimitConfig) -> bool {
        if self.is_locked(now) {
            return false;
        }

        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = now;

        if self.attempts >= config.max_attempts() {
            self.lockout_until = Some(now + delta(config.lockout_duration(self.lockout_level)));
            self.lockout_level = self.lockout_level.saturating_add(1);
            return true;
        }

        false
    }

    /// Apply a successful attempt.
    ///
    /// Escalated levels step down one at a time so that alternating
    /// lockouts and successes cannot reset the penalty.
    pub fn register_success(&mut self, now: DateTime<Utc>) {
        self.attempts = 0;
        self.lockout_until = None;
        self.last_attempt = now;
        self.lockout_level = if self.lockout_level >= 2 {
            self.lockout_level - 1
        } else {
            0
        };
    }
}

/// An invariant violation found in a persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// `last_attempt` lies further in the future than clock skew explains.
    FutureTimestamp,
    /// An active lockout ends later than the longest configured lockout.
    LockoutTooLong,
    /// An active lockout carries more attempts than the limit plus slack.
    AttemptsOverflow(u32),
    /// No lockout is active but attempts exceed the limit.
    AttemptsOutOfRange(u32),
}

/// Outcome of [`repair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub entry: RateLimitEntry,
    /// The record held a lockout that has since run out.
    pub lockout_expired: bool,
    pub corruptions: Vec<Corruption>,
}

impl Repair {
    /// Whether the repaired record differs from what is persisted.
    pub fn changed(&self) -> bool {
        self.lockout_expired || !self.corruptions.is_empty()
    }
}

/// Bring a persisted record back within its invariants.
///
/// Also performs the lockout expiry transition: an expired lockout is
/// cleared and its attempts reset, while the lockout level is kept.
pub fn repair(entry: &RateLimitEntry, now: DateTime<Utc>, config: &RateLimitConfig) -> Repair {
    let mut fixed = entry.clone();
    let mut corruptions = Vec::new();
    let mut lockout_expired = false;

    if fixed.last_attempt - now > delta(FUTURE_SKEW) {
        corruptions.push(Corruption::FutureTimestamp);
        fixed.last_attempt = now;
    }

    match fixed.lockout_until {
        Some(until) if now >= until => {
            lockout_expired = true;
            fixed.lockout_until = None;
            fixed.attempts = 0;
        }
        Some(until) => {
            if until - now > delta(config.extended_lockout_duration()) {
                corruptions.push(Corruption::LockoutTooLong);
                fixed.lockout_until = None;
                fixed.attempts = 0;
            } else if fixed.attempts > config.max_attempts().saturating_add(ATTEMPT_SLACK) {
                corruptions.push(Corruption::AttemptsOverflow(fixed.attempts));
                fixed.attempts = config.max_attempts();
            }
        }
        None => {}
    }

    if fixed.lockout_until.is_none() && fixed.attempts > config.max_attempts() {
        corruptions.push(Corruption::AttemptsOutOfRange(fixed.attempts));
        fixed.attempts = 0;
    }

    Repair {
        entry: fixed,
        lockout_expired,
        corruptions,
    }
}
