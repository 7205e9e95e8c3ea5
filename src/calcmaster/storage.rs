//! Key-value persistence port.
//!
//! The calculator core only needs `load(key)` and `save(key, value)` over
//! string values. [`KeyValueStore`] is that contract; two adapters ship with
//! the crate:
//!
//! - [`MemoryStore`]: process-local map, handy for tests and embedding.
//! - [`JsonFileStore`]: every key in one JSON object on disk, rewritten
//!   through a temp file and rename on each save.
//!
//! # Disk Format
//!
//! ```text
//! {
//!   "calculatorHistory": "[{\"expression\":\"2+2\",\"result\":\"4\",\"timestamp\":1700000000000,\"mode\":\"standard\"}]",
//!   "calculatorMemory": "12.5",
//!   "historyRetentionDays": "30",
//!   "isScientificMode": "false",
//!   "totalCalculations": "1",
//!   "totalUsageTime": "42"
//! }
//! ```
//!
//! # Example
//!
//! ```rust
//! use calcmaster::storage::{keys, KeyValueStore, MemoryStore};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let store = MemoryStore::new();
//! store.save(keys::MEMORY, "42").await?;
//! assert_eq!(store.load(keys::MEMORY).await?, Some("42".to_string()));
//! assert_eq!(store.load(keys::SCIENTIFIC_MODE).await?, None);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::warn;

/// Storage keys. Values are always strings.
pub mod keys {
    /// Memory register, as a decimal number.
    pub const MEMORY: &str = "calculatorMemory";
    /// `"true"` for scientific mode, `"false"` for standard.
    pub const SCIENTIFIC_MODE: &str = "isScientificMode";
    /// Accumulated usage in whole minutes.
    pub const USAGE_TIME: &str = "totalUsageTime";
    /// Number of successful evaluations.
    pub const CALCULATIONS: &str = "totalCalculations";
    /// JSON array of history entries, newest first.
    pub const HISTORY: &str = "calculatorHistory";
    /// Retention window in days, `0` for forever.
    pub const RETENTION_DAYS: &str = "historyRetentionDays";
    /// Presentation-owned: theme name.
    pub const SELECTED_THEME: &str = "selectedTheme";
    /// Presentation-owned: `"true"` / `"false"`.
    pub const DARK_MODE: &str = "isDarkMode";

    /// Keys owned by the calculator core.
    pub const CORE: [&str; 6] = [
        MEMORY,
        SCIENTIFIC_MODE,
        USAGE_TIME,
        CALCULATIONS,
        HISTORY,
        RETENTION_DAYS,
    ];
}

pub type StorageResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Asynchronous string key-value storage.
///
/// Callers treat every error as non-fatal: a failed load falls back to a
/// default and a failed save is logged.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn load(&self, key: &str) -> StorageResult<Option<String>>;

    async fn save(&self, key: &str, value: &str) -> StorageResult<()>;
}

/// In-memory store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, for inspection outside async code.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Synchronous write, e.g. to seed a store before restoring from it.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // A panic while holding the lock cannot leave a half-written String.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        self.insert(key, value);
        Ok(())
    }
}

/// File-backed store holding every key in a single JSON object.
///
/// The whole map is cached in memory; loads never touch the disk after
/// [`open`](JsonFileStore::open).
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open `path`, reading any existing contents.
    ///
    /// A missing file starts empty. A file that is not a JSON string map is
    /// logged and also treated as empty; it is overwritten by the next save.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, String>>(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "Ignoring unreadable state file {}: {}",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            entries: tokio::sync::Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn load(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        let json = serde_json::to_string_pretty(&*entries)?;
        write_atomically(&self.path, json.as_bytes()).await?;
        Ok(())
    }
}

async fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}
