//! Persisted Session Storage
//!
//! Keyed byte store used by handlers that resume sessions across app
//! restarts. Backends:
//!
//! - **MemorySessionStore**: process-local (testing, ephemeral hosts)
//! - **FileSessionStore**: one JSON envelope per key on local disk
//!
//! The interface is async so hosts can plug keychain or remote backends.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wallet_broker_core::storage::{FileSessionStore, SessionStore};
//!
//! let store = FileSessionStore::new("/path/to/sessions")?;
//! store.store("relay.session", &bytes).await?;
//! let bytes = store.load("relay.session").await?;
//! ```

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Trait for persisted-session backends
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store bytes under `key`, replacing any previous value
    async fn store(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Load bytes stored under `key`
    async fn load(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete `key`; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if `key` exists
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn store(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let records = self.records.read().await;
        records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let records = self.records.read().await;
        Ok(records.contains_key(key))
    }
}

/// On-disk envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    key: String,
    /// Hex-encoded session bytes
    data: String,
    stored_at: i64,
}

/// File system store for local storage
#[derive(Debug)]
pub struct FileSessionStore {
    base_path: PathBuf,
}

impl FileSessionStore {
    /// Create a store rooted at `base_path`, creating the directory if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();

        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }

        Ok(Self { base_path })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        // Sanitize key to prevent path traversal
        let safe_key = key.replace(['/', '\\', '.', '~'], "_");
        self.base_path.join(format!("{}.session", safe_key))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn store(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.record_path(key);
        let record = StoredSession {
            key: key.to_string(),
            data: hex::encode(data),
            stored_at: chrono::Utc::now().timestamp(),
        };
        tokio::fs::write(&path, serde_json::to_vec_pretty(&record)?).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&path, permissions).await?;
        }

        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let raw = tokio::fs::read(&path).await?;
        let record: StoredSession = serde_json::from_slice(&raw)?;
        hex::decode(&record.data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.record_path(key);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.record_path(key).exists())
    }
}
