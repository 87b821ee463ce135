//! Pseudo client identity derived from environment characteristics.
//!
//! This is an anti-abuse heuristic, not an identity system: anyone can reset
//! it by clearing local storage, and it must never be used for authorization.
//! No signal ever leaves the process; only the hash is persisted.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use cherut_core::ports::{Clock, Storage};

/// Storage key holding the persisted client id.
pub const CLIENT_ID_KEY: &str = "cherut_client_id";

const FINGERPRINT_LEN: usize = 16;

/// Non-PII characteristics of the running environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentSignals {
    pub user_agent: String,
    pub language: Option<String>,
    pub platform: String,
    pub screen_resolution: Option<String>,
    pub timezone: Option<String>,
    pub color_depth: Option<u32>,
    pub hardware_concurrency: Option<usize>,
    pub device_memory: Option<u64>,
}

impl EnvironmentSignals {
    /// Collect what the current process can observe about its environment.
    pub fn detect() -> Self {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let screen_resolution = match (env("COLUMNS"), env("LINES")) {
            (Some(cols), Some(lines)) => Some(format!("{cols}x{lines}")),
            _ => None,
        };

        let color_depth = match (env("COLORTERM"), env("TERM")) {
            (Some(c), _) if c == "truecolor" || c == "24bit" => Some(24),
            (_, Some(term)) if term.contains("256color") => Some(8),
            (_, Some(_)) => Some(4),
            _ => None,
        };

        Self {
            user_agent: concat!("cherut/", env!("CARGO_PKG_VERSION")).to_string(),
            language: env("LC_ALL").or_else(|| env("LANG")),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            screen_resolution,
            timezone: env("TZ")
                .or_else(|| Some(chrono::Local::now().offset().to_string())),
            color_depth,
            hardware_concurrency: std::thread::available_parallelism()
                .ok()
                .map(|n| n.get()),
            device_memory: None,
        }
    }

    /// Short, stable hash of the signals.
    pub fn fingerprint(&self) -> String {
        let canonical = [
            self.user_agent.clone(),
            self.language.clone().unwrap_or_default(),
            self.platform.clone(),
            self.screen_resolution.clone().unwrap_or_default(),
            self.timezone.clone().unwrap_or_default(),
            self.color_depth.map(|d| d.to_string()).unwrap_or_default(),
            self.hardware_concurrency
                .map(|n| n.to_string())
                .unwrap_or_default(),
            self.device_memory.map(|m| m.to_string()).unwrap_or_default(),
        ]
        .join("|");

        let digest = Sha256::digest(canonical.as_bytes());
        let mut hash = hex::encode(digest);
        hash.truncate(FINGERPRINT_LEN);
        hash
    }
}

/// Resolves the id rate limit records are keyed by.
///
/// The first call derives `{fingerprint}_{created_ms}` and persists it; later
/// calls and later processes sharing the storage get the same id. When the
/// storage is unusable a random per-session id is used instead, which only
/// protects for the life of this identity.
pub struct ClientIdentity {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    signals: EnvironmentSignals,
    resolved: OnceCell<String>,
}

impl ClientIdentity {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, signals: EnvironmentSignals) -> Self {
        Self {
            storage,
            clock,
            signals,
            resolved: OnceCell::new(),
        }
    }

    /// Identity using the signals of the running environment.
    pub fn detect(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self::new(storage, clock, EnvironmentSignals::detect())
    }

    pub async fn client_id(&self) -> String {
        self.resolved.get_or_init(|| self.resolve()).await.clone()
    }

    async fn resolve(&self) -> String {
        match self.storage.get(CLIENT_ID_KEY).await {
            Ok(Some(id)) if is_well_formed(&id) => return id,
            Ok(Some(id)) => {
                tracing::warn!(len = id.len(), "Discarding malformed client id");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Client id storage unavailable, using session id");
                return session_id();
            }
        }

        let id = format!(
            "{}_{:x}",
            self.signals.fingerprint(),
            self.clock.now().timestamp_millis()
        );

        if let Err(e) = self.storage.set(CLIENT_ID_KEY, &id).await {
            tracing::warn!(error = %e, "Failed to persist client id, using session id");
            return session_id();
        }

        tracing::debug!(client_id = %id, "Created client id");
        id
    }
}

fn session_id() -> String {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}

fn is_well_formed(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;
    use chrono::DateTime;
    use cherut_core::ports::{ManualClock, StorageError};

    struct UnavailableStorage;

    #[async_trait]
    impl Storage for UnavailableStorage {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }
        async fn keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }
    }

    fn signals() -> EnvironmentSignals {
        EnvironmentSignals {
            user_agent: "cherut/test".to_string(),
            language: Some("en_US.UTF-8".to_string()),
            platform: "linux-x86_64".to_string(),
            screen_resolution: Some("120x40".to_string()),
            timezone: Some("+00:00".to_string()),
            color_depth: Some(24),
            hardware_concurrency: Some(8),
            device_memory: None,
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        ))
    }

    #[test]
    fn test_fingerprint_is_short_and_stable() {
        let a = signals().fingerprint();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, signals().fingerprint());

        let mut other = signals();
        other.hardware_concurrency = Some(4);
        assert_ne!(a, other.fingerprint());
    }

    #[tokio::test]
    async fn test_client_id_persisted_and_reused() {
        let storage = Arc::new(InMemoryStorage::new());

        let first = ClientIdentity::new(storage.clone(), clock(), signals());
        let id = first.client_id().await;
        assert_eq!(id, format!("{}_{:x}", signals().fingerprint(), 1_700_000_000_000_i64));
        assert_eq!(storage.get(CLIENT_ID_KEY).await.unwrap(), Some(id.clone()));

        let clock = clock();
        clock.advance(std::time::Duration::from_secs(3600));
        let second = ClientIdentity::new(storage, clock, signals());
        assert_eq!(second.client_id().await, id);
    }

    #[tokio::test]
    async fn test_malformed_id_replaced() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set(CLIENT_ID_KEY, "<script>").await.unwrap();

        let identity = ClientIdentity::new(storage.clone(), clock(), signals());
        let id = identity.client_id().await;
        assert!(id.starts_with(&signals().fingerprint()));
        assert_eq!(storage.get(CLIENT_ID_KEY).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_unavailable_storage_uses_session_id() {
        let identity = ClientIdentity::new(Arc::new(UnavailableStorage), clock(), signals());
        let id = identity.client_id().await;

        assert!(id.starts_with("session_"));
        assert_eq!(identity.client_id().await, id);

        let other = ClientIdentity::new(Arc::new(UnavailableStorage), clock(), signals());
        assert_ne!(other.client_id().await, id);
    }

    #[test]
    fn test_detect_has_platform() {
        let detected = EnvironmentSignals::detect();
        assert!(detected.user_agent.starts_with("cherut/"));
        assert!(!detected.platform.is_empty());
        assert_eq!(detected.fingerprint().len(), 16);
    }
}
