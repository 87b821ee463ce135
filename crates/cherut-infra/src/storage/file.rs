//! JSON file storage, the local persistence scoped to one user profile.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories_next::ProjectDirs;
use tokio::sync::RwLock;

use cherut_core::ports::{Storage, StorageError};

/// File storage configuration.
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Path of the JSON document holding every key.
    pub path: PathBuf,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

impl FileStorageConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            path: std::env::var("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_path()),
        }
    }
}

fn default_path() -> PathBuf {
    // e.g. ~/.local/share/cherut/storage.json
    match ProjectDirs::from("org", "Cherut", "Cherut") {
        Some(dirs) => dirs.data_dir().join("storage.json"),
        None => PathBuf::from("cherut-storage.json"),
    }
}

/// Key-value storage persisted as a single JSON object on disk.
///
/// The whole document is kept in memory and rewritten on every change.
/// An unreadable document is treated as empty and replaced on next write.
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    pub async fn open(config: FileStorageConfig) -> Result<Self, StorageError> {
        let entries = match tokio::fs::read_to_string(&config.path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %config.path.display(), error = %e, "Storage file is corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Connection(e.to_string())),
        };

        tracing::info!(path = %config.path.display(), keys = entries.len(), "Opened file storage");

        Ok(Self {
            path: config.path,
            entries: RwLock::new(entries),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StorageError> {
        Self::open(FileStorageConfig::from_env()).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::Operation(e.to_string()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| StorageError::Operation(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::Operation(e.to_string()))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(key.to_string(), value.to_string());

        if let Err(e) = self.flush(&entries).await {
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&entries).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> FileStorageConfig {
        FileStorageConfig {
            path: dir.path().join("nested").join("storage.json"),
        }
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileStorage::open(config(&dir)).await.unwrap();
        storage.set("cherut_client_id", "abc_1").await.unwrap();
        storage.set("rate_limit_login_abc_1", "{}").await.unwrap();
        drop(storage);

        let reopened = FileStorage::open(config(&dir)).await.unwrap();
        assert_eq!(
            reopened.get("cherut_client_id").await.unwrap(),
            Some("abc_1".to_string())
        );
        assert_eq!(
            reopened.keys("rate_limit_").await.unwrap(),
            vec!["rate_limit_login_abc_1"]
        );
    }

    #[tokio::test]
    async fn test_remove_persists() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileStorage::open(config(&dir)).await.unwrap();
        storage.set("k", "v").await.unwrap();
        storage.remove("k").await.unwrap();
        storage.remove("never-set").await.unwrap();

        let reopened = FileStorage::open(config(&dir)).await.unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(config(&dir)).await.unwrap();
        for key in ["a_1", "b_1", "b_2", "c_1"] {
            storage.set(key, "x").await.unwrap();
        }
        assert_eq!(storage.keys("b_").await.unwrap(), vec!["b_1", "b_2"]);
        assert_eq!(storage.keys("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.path.parent().unwrap()).unwrap();
        std::fs::write(&config.path, "not json at all").unwrap();

        let storage = FileStorage::open(config).await.unwrap();
        assert!(storage.keys("").await.unwrap().is_empty());
        storage.set("k", "v").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_failed_flush_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);

        let storage = FileStorage::open(config.clone()).await.unwrap();
        storage.set("kept", "1").await.unwrap();
        storage.set("replaced", "old").await.unwrap();

        // A directory in the way of the temp file makes every flush fail.
        std::fs::create_dir(config.path.with_extension("json.tmp")).unwrap();

        assert!(storage.set("replaced", "new").await.is_err());
        assert!(storage.set("added", "x").await.is_err());

        assert_eq!(storage.get("replaced").await.unwrap(), Some("old".to_string()));
        assert_eq!(storage.get("added").await.unwrap(), None);
        assert_eq!(storage.keys("").await.unwrap(), vec!["kept", "replaced"]);

        let reopened = FileStorage::open(config).await.unwrap();
        assert_eq!(reopened.get("replaced").await.unwrap(), Some("old".to_string()));
    }
}
