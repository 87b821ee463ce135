//! Domain-level error types.

use std::time::Duration;

use thiserror::Error;

use crate::domain::ActionKind;

/// Rate limit policy errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("{field} must be positive")]
    ZeroDuration { field: &'static str },

    #[error("{field} of {duration:?} exceeds the {limit:?} record lifetime")]
    DurationTooLong {
        field: &'static str,
        duration: Duration,
        limit: Duration,
    },

    #[error("storage namespace must not be empty")]
    EmptyNamespace,

    #[error("No rate limit policy configured for action: {0}")]
    MissingPolicy(ActionKind),

    #[error("Unknown action: {0}")]
    UnknownAction(String),
}
