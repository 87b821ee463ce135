//! Pure formatting of rate limit results for display.

use serde::{Deserialize, Serialize};

use crate::domain::{RateLimitConfig, RateLimitResult};

/// Attempts remaining at or below which a warning is shown.
pub const WARNING_THRESHOLD: u32 = 2;

/// Display tier of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Locked,
}

/// Turns results into text and meter values for one policy.
#[derive(Debug, Clone)]
pub struct RateLimitPresenter {
    config: RateLimitConfig,
}

impl RateLimitPresenter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    pub fn severity(&self, result: &RateLimitResult) -> Severity {
        if !result.allowed {
            Severity::Locked
        } else if result.attempts_remaining <= WARNING_THRESHOLD {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }

    /// Message for the user, empty when there is nothing to say.
    pub fn message(&self, result: &RateLimitResult) -> String {
        match self.severity(result) {
            Severity::Locked => format!(
                "Too many failed attempts. Please try again in {}.",
                format_duration(result.lockout_time_remaining)
            ),
            Severity::Warning => format!(
                "{} {} remaining before lockout.",
                result.attempts_remaining,
                plural(result.attempts_remaining, "attempt")
            ),
            Severity::Normal => String::new(),
        }
    }

    /// Meter value in `[0, 1]`.
    ///
    /// While locked this is the elapsed share of the lockout, otherwise the
    /// consumed share of the allowed attempts.
    pub fn progress(&self, result: &RateLimitResult) -> f64 {
        let ratio = if result.is_locked() {
            let total = self
                .config
                .lockout_duration(result.lockout_level.saturating_sub(1))
                .as_secs();
            if total == 0 {
                return 1.0;
            }
            total.saturating_sub(result.lockout_time_remaining) as f64 / total as f64
        } else {
            result.total_attempts as f64 / self.config.max_attempts() as f64
        };
        ratio.clamp(0.0, 1.0)
    }
}

/// Spell out a number of seconds, e.g. "2 minutes and 5 seconds".
pub fn format_duration(secs: u64) -> String {
    let minutes = secs / 60;
    let seconds = secs % 60;

    match (minutes, seconds) {
        (0, s) => format!("{s} {}", plural(s, "second")),
        (m, 0) => format!("{m} {}", plural(m, "minute")),
        (m, s) => format!(
            "{m} {} and {s} {}",
            plural(m, "minute"),
            plural(s, "second")
        ),
    }
}

/// Clock-style countdown, e.g. "1:05".
pub fn format_countdown(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn plural(n: impl Into<u64>, word: &str) -> String {
    if n.into() == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}
