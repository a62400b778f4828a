//! Storage for the generation API key.
//!
//! The file-backed store is a small JSON key-value document; the key lives
//! under `geminiApiKey` and unrelated entries are preserved on write.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use shared::secret::ApiKey;
use std::path::{Path, PathBuf};

const API_KEY_FIELD: &str = "geminiApiKey";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to read stored API key: {0}")]
    Read(String),

    #[error("Failed to save API Key: {0}")]
    Write(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when no key has been saved.
    async fn get(&self) -> Result<Option<ApiKey>, CredentialError>;

    async fn set(&self, key: ApiKey) -> Result<(), CredentialError>;
}

/// Default location: `<config_dir>/page_chat/storage.json`.
pub fn default_storage_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("page_chat");
        p.push("storage.json");
        p
    })
}

pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<Map<String, Value>, String> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.to_string()),
        };
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&contents).map_err(|e| e.to_string())? {
            Value::Object(map) => Ok(map),
            _ => Err("storage file is not a JSON object".to_string()),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self) -> Result<Option<ApiKey>, CredentialError> {
        let map = self.read_map().await.map_err(CredentialError::Read)?;
        Ok(map
            .get(API_KEY_FIELD)
            .and_then(Value::as_str)
            .and_then(ApiKey::new))
    }

    async fn set(&self, key: ApiKey) -> Result<(), CredentialError> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.read_map().await.map_err(CredentialError::Write)?;
        map.insert(
            API_KEY_FIELD.to_string(),
            Value::String(key.expose().to_string()),
        );
        let json = serde_json::to_string_pretty(&Value::Object(map))
            .map_err(|e| CredentialError::Write(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CredentialError::Write(e.to_string()))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| CredentialError::Write(e.to_string()))?;
        tracing::info!(path = %self.path.display(), "saved API key");
        Ok(())
    }
}

/// In-process store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    key: Mutex<Option<ApiKey>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: &str) -> Self {
        Self {
            key: Mutex::new(ApiKey::new(key)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Option<ApiKey>, CredentialError> {
        Ok(self.key.lock().clone())
    }

    async fn set(&self, key: ApiKey) -> Result<(), CredentialError> {
        *self.key.lock() = Some(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_means_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("storage.json"));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_preserves_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        store.set(ApiKey::new("AIza-123").unwrap()).await.unwrap();

        let key = store.get().await.unwrap().unwrap();
        assert_eq!(key.expose(), "AIza-123");

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
    }

    #[tokio::test]
    async fn test_blank_stored_key_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, r#"{"geminiApiKey":"  "}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(matches!(store.get().await, Err(CredentialError::Read(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().await.unwrap().is_none());
        store.set(ApiKey::new("k").unwrap()).await.unwrap();
        assert_eq!(store.get().await.unwrap().unwrap().expose(), "k");
    }
}
