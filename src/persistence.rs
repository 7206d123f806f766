//! Key-value persistence for learned state
//!
//! The learning store talks to storage only through [`KeyValueStore`].
//! `JsonFileStore` keeps one JSON file per key under a directory (by default
//! ~/.intent_core/); `MemoryStore` keeps everything in process.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

/// Default directory for persisted state.
pub fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".intent_core")
}

pub trait KeyValueStore: Send + Sync {
    /// Bytes stored under `key`, or `None` when nothing was saved yet.
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    fn save(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }

    /// Store rooted at a custom directory (useful for testing)
    pub fn new_with_path(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create store directory")?;

        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, bytes)
            .await
            .context("Failed to write store file")?;
        fs::rename(&staging, &path)
            .await
            .context("Failed to replace store file")?;

        Ok(())
    }
}

/// In-process store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), bytes);
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().ok()?.get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?
            .insert(key.to_string(), bytes);
        Ok(())
    }
}
