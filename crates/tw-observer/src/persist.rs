//! Persisted state blobs
//!
//! The observer's durable state is six independently-keyed JSON blobs, each
//! loaded once at startup and rewritten in full whenever its owning
//! structure mutates. Writes are fire-and-forget: a failed write degrades
//! durability only and never blocks a gate decision.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;

/// The six persisted state blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Sites,
    HistoryMap,
    BlockedDomains,
    Registered,
    RemoveCookies,
    BlockedCategories,
}

impl StateKey {
    pub const ALL: [StateKey; 6] = [
        StateKey::Sites,
        StateKey::HistoryMap,
        StateKey::BlockedDomains,
        StateKey::Registered,
        StateKey::RemoveCookies,
        StateKey::BlockedCategories,
    ];

    /// Stable storage key, also used as the file stem on disk.
    pub fn name(self) -> &'static str {
        match self {
            StateKey::Sites => "sites",
            StateKey::HistoryMap => "histmap",
            StateKey::BlockedDomains => "blocked",
            StateKey::Registered => "registered",
            StateKey::RemoveCookies => "removecookies",
            StateKey::BlockedCategories => "blockedcat",
        }
    }
}

/// Key-value storage for the state blobs.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: StateKey) -> Result<Option<String>, StoreError>;
    async fn save(&self, key: StateKey, blob: String) -> Result<(), StoreError>;
}

// =============================================================================
// JSON file store
// =============================================================================

/// One JSON file per state key under a state directory. Writes go through a
/// temp file and rename, so a crash mid-write never corrupts a blob.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonFileStore { dir: dir.into() }
    }

    fn path_for(&self, key: StateKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.name()))
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self, key: StateKey) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(tokio::fs::read_to_string(&path).await?))
    }

    async fn save(&self, key: StateKey, blob: String) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, blob).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Volatile store for tests and one-shot replays.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<StateKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a blob back synchronously (test convenience).
    pub fn blob(&self, key: StateKey) -> Option<String> {
        self.blobs.lock().unwrap().get(&key).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, key: StateKey) -> Result<Option<String>, StoreError> {
        Ok(self.blobs.lock().unwrap().get(&key).cloned())
    }

    async fn save(&self, key: StateKey, blob: String) -> Result<(), StoreError> {
        self.blobs.lock().unwrap().insert(key, blob);
        Ok(())
    }
}
