use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::STALE_AFTER;
use crate::error::ConfigError;

/// Category of protected operation. Each category is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Login,
    Registration,
    PasswordReset,
    PasswordChange,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Login,
        ActionKind::Registration,
        ActionKind::PasswordReset,
        ActionKind::PasswordChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Login => "login",
            ActionKind::Registration => "registration",
            ActionKind::PasswordReset => "password-reset",
            ActionKind::PasswordChange => "password-change",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "login" => Ok(ActionKind::Login),
            "registration" | "register" => Ok(ActionKind::Registration),
            "password-reset" => Ok(ActionKind::PasswordReset),
            "password-change" => Ok(ActionKind::PasswordChange),
            _ => Err(ConfigError::UnknownAction(s.to_string())),
        }
    }
}

/// Lockout policy for one action category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    max_attempts: u32,
    first_lockout_duration: Duration,
    extended_lockout_duration: Duration,
    storage_namespace: String,
}

impl RateLimitConfig {
    /// Build a validated policy.
    ///
    /// Durations may not exceed the record lifetime, otherwise a lockout
    /// would outlive the record that carries it.
    pub fn new(
        max_attempts: u32,
        first_lockout_duration: Duration,
        extended_lockout_duration: Duration,
        storage_namespace: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        for (field, duration) in [
            ("first_lockout_duration", first_lockout_duration),
            ("extended_lockout_duration", extended_lockout_duration),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
            if duration > STALE_AFTER {
                return Err(ConfigError::DurationTooLong {
                    field,
                    duration,
                    limit: STALE_AFTER,
                });
            }
        }
        let storage_namespace = storage_namespace.into();
        if storage_namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }

        Ok(Self {
            max_attempts,
            first_lockout_duration,
            extended_lockout_duration,
            storage_namespace,
        })
    }

    /// Built-in policy for an action category.
    pub fn for_action(action: ActionKind) -> Self {
        let (max_attempts, first, extended) = match action {
            ActionKind::Login => (5, 120, 600),
            ActionKind::Registration => (3, 300, 1800),
            ActionKind::PasswordReset => (3, 300, 3600),
            ActionKind::PasswordChange => (5, 300, 1800),
        };

        Self {
            max_attempts,
            first_lockout_duration: Duration::from_secs(first),
            extended_lockout_duration: Duration::from_secs(extended),
            storage_namespace: format!("rate_limit_{}_", action.as_str().replace('-', "_")),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn first_lockout_duration(&self) -> Duration {
        self.first_lockout_duration
    }

    pub fn extended_lockout_duration(&self) -> Duration {
        self.extended_lockout_duration
    }

    pub fn storage_namespace(&self) -> &str {
        &self.storage_namespace
    }

    /// Lockout length for a client that has already been locked out `level` times.
    pub fn lockout_duration(&self, level: u32) -> Duration {
        if level == 0 {
            self.first_lockout_duration
        } else {
            self.extended_lockout_duration
        }
    }

    /// Persisted record key for a client.
    pub fn storage_key(&self, client_id: &str) -> String {
        format!("{}{}", self.storage_namespace, client_id)
    }
}

/// Table of policies, one per action category.
///
/// Passed to the service explicitly so tests can inject their own limits.
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicies {
    policies: BTreeMap<ActionKind, RateLimitConfig>,
}

impl RateLimitPolicies {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the built-in policy of every action.
    pub fn builtin() -> Self {
        ActionKind::ALL
            .into_iter()
            .fold(Self::new(), |table, action| {
                table.with(action, RateLimitConfig::for_action(action))
            })
    }

    pub fn with(mut self, action: ActionKind, config: RateLimitConfig) -> Self {
        self.policies.insert(action, config);
        self
    }

    pub fn get(&self, action: ActionKind) -> Result<&RateLimitConfig, ConfigError> {
        self.policies
            .get(&action)
            .ok_or(ConfigError::MissingPolicy(action))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionKind, &RateLimitConfig)> {
        self.policies.iter().map(|(action, config)| (*action, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_policies() {
        let policies = RateLimitPolicies::builtin();

        let login = policies.get(ActionKind::Login).unwrap();
        assert_eq!(login.max_attempts(), 5);
        assert_eq!(login.first_lockout_duration(), Duration::from_secs(120));
        assert_eq!(login.extended_lockout_duration(), Duration::from_secs(600));
        assert_eq!(login.storage_key("abc"), "rate_limit_login_abc");

        assert_eq!(policies.get(ActionKind::Registration).unwrap().max_attempts(), 3);
        assert_eq!(policies.get(ActionKind::PasswordReset).unwrap().max_attempts(), 3);
        assert_eq!(policies.get(ActionKind::PasswordChange).unwrap().max_attempts(), 5);
        assert_eq!(
            policies.get(ActionKind::PasswordReset).unwrap().storage_namespace(),
            "rate_limit_password_reset_"
        );
    }

    #[test]
    fn test_lockout_duration_escalates_after_first() {
        let config = RateLimitConfig::for_action(ActionKind::Login);
        assert_eq!(config.lockout_duration(0), Duration::from_secs(120));
        assert_eq!(config.lockout_duration(1), Duration::from_secs(600));
        assert_eq!(config.lockout_duration(7), Duration::from_secs(600));
    }

    #[test]
    fn test_config_validation() {
        let secs = Duration::from_secs;
        assert_eq!(
            RateLimitConfig::new(0, secs(1), secs(2), "ns_"),
            Err(ConfigError::ZeroAttempts)
        );
        assert_eq!(
            RateLimitConfig::new(3, Duration::ZERO, secs(2), "ns_"),
            Err(ConfigError::ZeroDuration {
                field: "first_lockout_duration"
            })
        );
        assert!(matches!(
            RateLimitConfig::new(3, secs(1), secs(25 * 3600), "ns_"),
            Err(ConfigError::DurationTooLong { .. })
        ));
        assert_eq!(
            RateLimitConfig::new(3, secs(1), secs(2), ""),
            Err(ConfigError::EmptyNamespace)
        );
        assert!(RateLimitConfig::new(1, secs(1), secs(1), "ns_").is_ok());
    }

    #[test]
    fn test_missing_policy() {
        let policies = RateLimitPolicies::new()
            .with(ActionKind::Login, RateLimitConfig::for_action(ActionKind::Login));
        assert_eq!(
            policies.get(ActionKind::Registration).unwrap_err(),
            ConfigError::MissingPolicy(ActionKind::Registration)
        );
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("login".parse::<ActionKind>().unwrap(), ActionKind::Login);
        assert_eq!(
            "PASSWORD_RESET".parse::<ActionKind>().unwrap(),
            ActionKind::PasswordReset
        );
        assert!("logout".parse::<ActionKind>().is_err());
    }
}
