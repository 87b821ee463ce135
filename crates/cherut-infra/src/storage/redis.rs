//! Redis storage implementation for deployments that share records across processes.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, AsyncIter, Client};

use cherut_core::ports::{Storage, StorageError};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whether to fallback to in-memory storage if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            fallback_to_memory: true,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }
}

/// Redis-backed storage.
///
/// Uses connection manager for automatic reconnection.
pub struct RedisStorage {
    conn: ConnectionManager,
}

impl RedisStorage {
    pub async fn new(config: RedisConfig) -> Result<Self, StorageError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StorageError::Connection("Connection timed out".to_string()))?
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!(url = %config.url, "Connected to Redis storage");

        Ok(Self { conn })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(RedisConfig::from_env()).await
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| StorageError::Operation(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| StorageError::Operation(e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| StorageError::Operation(e.to_string()))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));

        let mut iter: AsyncIter<String> = conn
            .scan_match(pattern)
            .await
            .map_err(|e| StorageError::Operation(e.to_string()))?;

        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

/// Escape glob metacharacters so the prefix matches literally in SCAN MATCH.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get_test_storage() -> Option<RedisStorage> {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6389".to_string()),
            connect_timeout: Duration::from_secs(1),
            fallback_to_memory: false,
        };

        RedisStorage::new(config).await.ok()
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("rate_limit_login_"), "rate_limit_login_");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[tokio::test]
    async fn test_redis_storage_set_get_remove() {
        let storage = match get_test_storage().await {
            Some(s) => s,
            None => {
                tracing::warn!("Redis not available, skipping test");
                return;
            }
        };

        let key = "cherut_test_key";
        storage.set(key, "value").await.unwrap();
        assert_eq!(storage.get(key).await.unwrap(), Some("value".to_string()));

        storage.remove(key).await.unwrap();
        assert_eq!(storage.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redis_storage_keys() {
        let storage = match get_test_storage().await {
            Some(s) => s,
            None => return,
        };

        storage.set("cherut_test_scan_a", "1").await.unwrap();
        storage.set("cherut_test_scan_b", "2").await.unwrap();

        let mut keys = storage.keys("cherut_test_scan_").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cherut_test_scan_a", "cherut_test_scan_b"]);

        storage.remove("cherut_test_scan_a").await.unwrap();
        storage.remove("cherut_test_scan_b").await.unwrap();
    }
}
