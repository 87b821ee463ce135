//! Domain entities - the rate limit records and the policies that govern them.

mod action;
mod entry;
mod result;

use std::time::Duration;

use chrono::TimeDelta;

pub use action::{ActionKind, RateLimitConfig, RateLimitPolicies};
pub use entry::{Corruption, RateLimitEntry, Repair, repair};
pub use result::RateLimitResult;

/// Records untouched for longer than this are discarded instead of repaired.
pub const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Expired lockouts older than this are removed by the prune sweep.
pub const EXPIRED_LOCKOUT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Tolerated excess over `max_attempts` while a lockout is active.
pub const ATTEMPT_SLACK: u32 = 2;

/// Tolerated clock skew for `last_attempt` timestamps in the future.
pub const FUTURE_SKEW: Duration = Duration::from_secs(60);

pub(crate) fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
