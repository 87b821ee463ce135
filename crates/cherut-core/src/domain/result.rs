use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RateLimitConfig, RateLimitEntry};

/// Standing of a client for one action, derived from its record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub attempts_remaining: u32,
    /// Whole seconds, rounded up so an active lockout never shows 0.
    pub lockout_time_remaining: u64,
    pub lockout_level: u32,
    pub total_attempts: u32,
}

impl RateLimitResult {
    /// Project a (repaired) record onto the policy at `now`.
    pub fn evaluate(entry: &RateLimitEntry, config: &RateLimitConfig, now: DateTime<Utc>) -> Self {
        match entry.lockout_until.filter(|until| now < *until) {
            Some(until) => {
                let millis = (until - now).num_milliseconds().max(0) as u64;
                Self {
                    allowed: false,
                    attempts_remaining: 0,
                    lockout_time_remaining: millis.div_ceil(1000),
                    lockout_level: entry.lockout_level,
                    total_attempts: entry.attempts,
                }
            }
            None => Self {
                allowed: true,
                attempts_remaining: config.max_attempts().saturating_sub(entry.attempts),
                lockout_time_remaining: 0,
                lockout_level: entry.lockout_level,
                total_attempts: entry.attempts,
            },
        }
    }

    pub fn is_locked(&self) -> bool {
        !self.allowed && self.lockout_time_remaining > 0
    }
}
