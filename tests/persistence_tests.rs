//! Persistence test suite
//!
//! Tests cover:
//! - Save queue coalescing, debounce, flush and drain on drop
//! - Best-effort session loading with missing and corrupt values
//! - Calculator state surviving a restore through memory and file stores
//! - Storage failures staying non-fatal

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use calcmaster::clock::ManualClock;
use calcmaster::history::MILLIS_PER_DAY;
use calcmaster::persistence::load_session;
use calcmaster::storage::{keys, StorageResult};
use calcmaster::{
    CalcConfig, Calculator, HistoryManager, JsonFileStore, KeyValueStore, MemoryStore, Mode,
    PersistedState, Persister,
};
use tempfile::tempdir;

const NOW: i64 = 1_700_000_000_000;

/// Remembers every save in order.
#[derive(Default, Clone)]
struct RecordingStore {
    saves: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingStore {
    fn saves(&self) -> Vec<(String, String)> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyValueStore for RecordingStore {
    async fn load(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    async fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        self.saves
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}

/// Fails every call.
struct BrokenStore;

#[async_trait]
impl KeyValueStore for BrokenStore {
    async fn load(&self, key: &str) -> StorageResult<Option<String>> {
        Err(format!("cannot read {}", key).into())
    }

    async fn save(&self, key: &str, _value: &str) -> StorageResult<()> {
        Err(format!("cannot write {}", key).into())
    }
}

fn test_config() -> CalcConfig {
    CalcConfig {
        save_debounce: Duration::from_millis(10),
        ..CalcConfig::default()
    }
}

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(NOW))
}

#[tokio::test]
async fn test_persister_coalesces_writes_per_key() {
    let store = RecordingStore::default();
    let persister = Persister::spawn(Arc::new(store.clone()), Duration::from_secs(60));

    persister.schedule(keys::MEMORY, "1".to_string());
    persister.schedule(keys::MEMORY, "2".to_string());
    persister.schedule(keys::SCIENTIFIC_MODE, "true".to_string());
    persister.schedule(keys::MEMORY, "3".to_string());
    persister.flush().await;

    let mut saves = store.saves();
    saves.sort();
    assert_eq!(
        saves,
        vec![
            (keys::MEMORY.to_string(), "3".to_string()),
            (keys::SCIENTIFIC_MODE.to_string(), "true".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_persister_writes_after_debounce() {
    let store = MemoryStore::new();
    let persister = Persister::spawn(Arc::new(store.clone()), Duration::from_millis(20));

    persister.schedule(keys::USAGE_TIME, "5".to_string());
    assert_eq!(store.get(keys::USAGE_TIME), None);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.get(keys::USAGE_TIME), Some("5".to_string()));
}

#[tokio::test]
async fn test_persister_drains_when_dropped() {
    let store = MemoryStore::new();
    let persister = Persister::spawn(Arc::new(store.clone()), Duration::from_secs(60));
    persister.schedule(keys::CALCULATIONS, "9".to_string());
    drop(persister);

    for _ in 0..100 {
        if store.get(keys::CALCULATIONS).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.get(keys::CALCULATIONS), Some("9".to_string()));
}

#[tokio::test]
async fn test_load_session_defaults_on_empty_store() {
    let store = MemoryStore::new();
    let session = load_session(&store, 30).await;
    assert_eq!(session.state, PersistedState::default());
    assert!(session.history.is_empty());
    assert_eq!(session.retention_days, 30);
}

#[tokio::test]
async fn test_load_session_ignores_corrupt_values() {
    let store = MemoryStore::new();
    store.insert(keys::MEMORY, "twelve");
    store.insert(keys::SCIENTIFIC_MODE, "maybe");
    store.insert(keys::USAGE_TIME, "-3");
    store.insert(keys::CALCULATIONS, "17");
    store.insert(keys::HISTORY, "{not json");
    store.insert(keys::RETENTION_DAYS, "forever");

    let session = load_session(&store, 7).await;
    assert_eq!(session.state.memory, 0.0);
    assert_eq!(session.state.mode, Mode::Standard);
    assert_eq!(session.state.usage_minutes, 0);
    assert_eq!(session.state.calculations, 17);
    assert!(session.history.is_empty());
    assert_eq!(session.retention_days, 7);
}

#[tokio::test]
async fn test_load_session_rejects_non_finite_memory() {
    for raw in &["inf", "NaN", "-infinity"] {
        let store = MemoryStore::new();
        store.insert(keys::MEMORY, *raw);
        let session = load_session(&store, 30).await;
        assert_eq!(session.state.memory, 0.0, "stored {}", raw);
    }
}

#[tokio::test]
async fn test_restore_round_trip() {
    let store = MemoryStore::new();
    let clock = manual_clock();
    let config = test_config();

    let mut calc = Calculator::restore(Arc::new(store.clone()), &config, clock.clone()).await;
    calc.append("12.5").unwrap();
    calc.memory_add().unwrap();
    calc.toggle_mode();
    calc.append("*2").unwrap();
    calc.evaluate().unwrap();
    calc.set_retention(7);
    calc.track_session_time(NOW + 3 * 60_000 + 59_000);
    calc.flush().await;
    let saved = calc.persisted_state();

    let restored = Calculator::restore(Arc::new(store.clone()), &config, clock).await;
    assert_eq!(restored.persisted_state(), saved);
    assert_eq!(
        saved,
        PersistedState {
            memory: 12.5,
            mode: Mode::Scientific,
            usage_minutes: 3,
            calculations: 1,
        }
    );
    assert_eq!(restored.history().entries(), calc.history().entries());
    assert_eq!(restored.history().retention_days(), 7);

    // The edit buffer is session-only.
    assert_eq!(restored.buffer(), "");
    assert_eq!(store.get(keys::SCIENTIFIC_MODE), Some("true".to_string()));
}

#[tokio::test]
async fn test_restore_prunes_stale_history() {
    let store = MemoryStore::new();
    let mut history = HistoryManager::new(0);
    history.record("1+1", "2", Mode::Standard, NOW - 3 * MILLIS_PER_DAY);
    history.record("2+2", "4", Mode::Standard, NOW - 60_000);
    store.insert(keys::HISTORY, history.to_json().unwrap());
    store.insert(keys::RETENTION_DAYS, "1");

    let calc = Calculator::restore(Arc::new(store.clone()), &test_config(), manual_clock()).await;
    assert_eq!(calc.history().len(), 1);
    assert_eq!(calc.history().entries()[0].result, "4");

    calc.flush().await;
    let stored: serde_json::Value =
        serde_json::from_str(&store.get(keys::HISTORY).unwrap()).unwrap();
    assert_eq!(stored.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_restore_drops_history_with_extreme_timestamps() {
    let store = MemoryStore::new();
    let stored = serde_json::json!([
        {"expression": "2+2", "result": "4", "timestamp": NOW - 60_000, "mode": "standard"},
        {"expression": "1+1", "result": "2", "timestamp": i64::MIN, "mode": "standard"}
    ]);
    store.insert(keys::HISTORY, stored.to_string());
    store.insert(keys::CALCULATIONS, u64::MAX.to_string());

    let mut calc =
        Calculator::restore(Arc::new(store.clone()), &test_config(), manual_clock()).await;
    assert_eq!(calc.history().len(), 1);
    assert_eq!(calc.history().entries()[0].result, "4");

    // The counter saturates instead of wrapping.
    calc.append("1+1").unwrap();
    calc.evaluate().unwrap();
    assert_eq!(calc.usage().total_calculations, u64::MAX);

    calc.flush().await;
    let saved: serde_json::Value =
        serde_json::from_str(&store.get(keys::HISTORY).unwrap()).unwrap();
    assert!(saved
        .as_array()
        .unwrap()
        .iter()
        .all(|entry| entry["timestamp"] != serde_json::json!(i64::MIN)));
}

#[tokio::test]
async fn test_only_changed_keys_are_saved() {
    let store = RecordingStore::default();
    let mut calc = Calculator::restore(Arc::new(store.clone()), &test_config(), manual_clock()).await;

    calc.append("7").unwrap();
    calc.memory_add().unwrap();
    calc.flush().await;

    let keys_written: Vec<String> = store.saves().into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys_written, vec![keys::MEMORY.to_string()]);
}

#[tokio::test]
async fn test_broken_store_is_not_fatal() {
    let mut calc = Calculator::restore(Arc::new(BrokenStore), &test_config(), manual_clock()).await;
    assert_eq!(calc.persisted_state(), PersistedState::default());
    assert_eq!(calc.history().retention_days(), 30);

    calc.append("6*7").unwrap();
    assert_eq!(calc.evaluate(), Ok(Some(42.0)));
    calc.memory_add().unwrap();
    calc.flush().await;

    assert_eq!(calc.memory(), 42.0);
    assert_eq!(calc.history().len(), 1);
}

#[tokio::test]
async fn test_memory_store_shares_state_between_clones() {
    let store = MemoryStore::new();
    let other = store.clone();
    store.save(keys::MEMORY, "4").await.unwrap();
    assert_eq!(other.load(keys::MEMORY).await.unwrap(), Some("4".to_string()));
    assert_eq!(other.len(), 1);
    assert_eq!(other.keys(), vec![keys::MEMORY.to_string()]);
}

#[tokio::test]
async fn test_json_file_store_persists_across_opens() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");

    let store = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(store.load(keys::MEMORY).await.unwrap(), None);
    store.save(keys::MEMORY, "3.5").await.unwrap();
    store.save(keys::SCIENTIFIC_MODE, "false").await.unwrap();

    let reopened = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(
        reopened.load(keys::MEMORY).await.unwrap(),
        Some("3.5".to_string())
    );
    assert_eq!(
        reopened.load(keys::SCIENTIFIC_MODE).await.unwrap(),
        Some("false".to_string())
    );

    let raw = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json[keys::MEMORY], "3.5");
}

#[tokio::test]
async fn test_json_file_store_treats_corrupt_file_as_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "this is not json").unwrap();

    let store = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(store.load(keys::MEMORY).await.unwrap(), None);

    store.save(keys::MEMORY, "1").await.unwrap();
    let reopened = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(reopened.load(keys::MEMORY).await.unwrap(), Some("1".to_string()));
}

#[tokio::test]
async fn test_calculator_open_with_file() {
    let dir = tempdir().unwrap();
    let config = CalcConfig {
        storage_path: dir.path().join("calc.json"),
        ..test_config()
    };

    let mut calc = Calculator::open(&config).await.unwrap();
    calc.append("50%").unwrap();
    calc.evaluate().unwrap();
    calc.memory_add().unwrap();
    calc.flush().await;

    let restored = Calculator::open(&config).await.unwrap();
    assert_eq!(restored.memory(), 0.5);
    assert_eq!(restored.usage().total_calculations, 1);
    assert_eq!(restored.history().entries()[0].expression, "50%");
}
