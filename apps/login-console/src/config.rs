//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;

use cherut_core::ActionKind;

/// Where rate limit records and the client id are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    File,
    Redis,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage: StorageBackend,
    pub action: ActionKind,
    pub demo_email: String,
    pub demo_password: String,
    /// Six-field cron expression for the expired record sweep.
    pub prune_schedule: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let demo_password = env::var("DEMO_PASSWORD").unwrap_or_else(|_| {
            tracing::warn!("DEMO_PASSWORD not set, using the built-in demo password");
            DEFAULT_DEMO_PASSWORD.to_string()
        });

        Self {
            storage: parse_or_default("STORAGE_BACKEND", env::var("STORAGE_BACKEND").ok(), StorageBackend::File),
            action: parse_or_default("LOGIN_ACTION", env::var("LOGIN_ACTION").ok(), ActionKind::Login),
            demo_email: env::var("DEMO_EMAIL").unwrap_or_else(|_| "demo@cherut.app".to_string()),
            demo_password,
            prune_schedule: env::var("PRUNE_SCHEDULE").unwrap_or_else(|_| "0 0 * * * *".to_string()),
        }
    }
}

const DEFAULT_DEMO_PASSWORD: &str = "cherut-demo";

fn parse_or_default<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!(var = name, error = %e, fallback = ?default, "Ignoring invalid setting");
            default
        }),
        None => default,
    }
}
