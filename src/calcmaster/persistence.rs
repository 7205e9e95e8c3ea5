//! Debounced save queue and best-effort session restore.
//!
//! The calculator mutates its state synchronously and hands every changed
//! value to a [`Persister`]. The persister forwards it to a background tokio
//! task that batches writes per key: if the same key is scheduled several
//! times within one debounce window only the last value reaches the store.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use calcmaster::persistence::Persister;
//! use calcmaster::storage::{keys, MemoryStore};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = MemoryStore::new();
//! let persister = Persister::spawn(Arc::new(store.clone()), Duration::from_millis(100));
//!
//! persister.schedule(keys::MEMORY, "1".to_string());
//! persister.schedule(keys::MEMORY, "2".to_string());
//! persister.flush().await;
//!
//! assert_eq!(store.get(keys::MEMORY), Some("2".to_string()));
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};

use super::calculator::PersistedState;
use super::history::HistoryEntry;
use super::storage::{keys, KeyValueStore};

#[derive(Debug)]
enum Command {
    Save { key: String, value: String },
    Flush(oneshot::Sender<()>),
}

/// Handle to the background save task. Cheap to clone.
///
/// The task exits once every handle is dropped, after writing whatever is
/// still pending.
#[derive(Debug, Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<Command>,
}

impl Persister {
    /// Start the save task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like [`tokio::spawn`].
    pub fn spawn(store: Arc<dyn KeyValueStore>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_save_queue(store, rx, debounce));
        Self { tx }
    }

    /// Queue `value` for `key`. Never blocks.
    pub fn schedule(&self, key: &str, value: String) {
        let command = Command::Save {
            key: key.to_string(),
            value,
        };
        if self.tx.send(command).is_err() {
            warn!("Save queue is closed; dropping write for {}", key);
        }
    }

    /// Write everything scheduled so far and wait until the store was called.
    ///
    /// Save failures are logged by the queue, not returned here.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_save_queue(
    store: Arc<dyn KeyValueStore>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    debounce: Duration,
) {
    let mut pending: BTreeMap<String, String> = BTreeMap::new();
    // Set when the first write of a batch arrives; later writes don't extend it.
    let mut deadline: Option<Instant> = None;

    loop {
        let received = match deadline {
            None => rx.recv().await,
            Some(at) => match timeout_at(at, rx.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    write_pending(store.as_ref(), &mut pending).await;
                    deadline = None;
                    continue;
                }
            },
        };

        match received {
            Some(Command::Save { key, value }) => {
                pending.insert(key, value);
                if deadline.is_none() {
                    deadline = Some(Instant::now() + debounce);
                }
            }
            Some(Command::Flush(done)) => {
                write_pending(store.as_ref(), &mut pending).await;
                deadline = None;
                let _ = done.send(());
            }
            None => break,
        }
    }

    write_pending(store.as_ref(), &mut pending).await;
    debug!("Save queue closed");
}

async fn write_pending(store: &dyn KeyValueStore, pending: &mut BTreeMap<String, String>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    debug!("Writing {} pending key(s)", batch.len());
    for (key, value) in batch {
        if let Err(e) = store.save(&key, &value).await {
            warn!("Failed to save {}: {}", key, e);
        }
    }
}

/// Everything read back from storage at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredSession {
    pub state: PersistedState,
    /// Newest first, not yet pruned.
    pub history: Vec<HistoryEntry>,
    pub retention_days: u32,
}

/// Read every core key from `store`.
///
/// Never fails: an unreadable, missing or corrupt value keeps its default and
/// is logged.
pub async fn load_session(
    store: &dyn KeyValueStore,
    default_retention_days: u32,
) -> RestoredSession {
    let mut values: HashMap<&'static str, String> = HashMap::new();
    for key in keys::CORE.iter() {
        match store.load(key).await {
            Ok(Some(value)) => {
                values.insert(*key, value);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to load {}: {}", key, e),
        }
    }

    let state = PersistedState::decode(|key| values.get(key).cloned());

    let retention_days = parse_stored(
        keys::RETENTION_DAYS,
        values.get(keys::RETENTION_DAYS).map(String::as_str),
    )
    .unwrap_or(default_retention_days);

    let history = match values.get(keys::HISTORY) {
        Some(raw) => match serde_json::from_str::<Vec<HistoryEntry>>(raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Ignoring corrupt {}: {}", keys::HISTORY, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    info!(
        "Restored session: {} history entries, retention {} days, {} calculations",
        history.len(),
        retention_days,
        state.calculations
    );

    RestoredSession {
        state,
        history,
        retention_days,
    }
}

/// Parse a stored string, logging values that don't parse.
pub(crate) fn parse_stored<T: FromStr>(key: &str, raw: Option<&str>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring corrupt {}: {:?}", key, raw);
            None
        }
    }
}
