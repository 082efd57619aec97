//! Persistent cache store
//!
//! The whole handle -> record map lives under one key of an external
//! key-value store. Loads happen once at startup; every mutation of the
//! coordinator's mirror queues a full snapshot to a single writer task, so
//! writes land in order and the last one wins.

use crate::error::{CoreError, DegradedState};
use crate::event::{EnrichEvent, EventBus};
use crate::models::CacheRecord;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Handle -> record map, as held by the coordinator and persisted by the store
pub type CacheSnapshot = HashMap<String, CacheRecord>;

/// External key-value persistence (get/set of JSON values by key)
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), CoreError>;
}

/// In-memory key-value store
///
/// Reads and writes can be switched to fail, which is how tests exercise
/// the degraded paths.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Value>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: impl Into<String>, value: Value) -> Self {
        self.entries.lock().insert(key.into(), value);
        self
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Raw value currently stored under `key`
    pub fn raw(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CoreError::StorageRead {
                key: key.to_string(),
                message: "storage unavailable".to_string(),
            });
        }
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoreError::StorageWrite {
                key: key.to_string(),
                message: "storage unavailable".to_string(),
            });
        }
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Key-value store backed by a single JSON object file
#[derive(Debug)]
pub struct JsonFileKv {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file
    io_lock: Mutex<()>,
}

impl JsonFileKv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    /// `<cache_dir>/feedloc/storage.json`
    pub fn default_path() -> Result<PathBuf, CoreError> {
        let dir = dirs::cache_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "Could not determine cache directory".to_string(),
        })?;
        Ok(dir.join("feedloc").join("storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw file content; a missing file reads as `None`
    fn read_file(&self) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn parse_object(&self, key: &str, content: &[u8]) -> Result<Map<String, Value>, CoreError> {
        match serde_json::from_slice::<Value>(content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CoreError::StorageRead {
                key: key.to_string(),
                message: format!("{} is not a JSON object", self.path.display()),
            }),
            Err(e) => Err(CoreError::StorageRead {
                key: key.to_string(),
                message: format!("{}: {}", self.path.display(), e),
            }),
        }
    }
}

impl KeyValueStore for JsonFileKv {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        let _guard = self.io_lock.lock();
        let content = self.read_file().map_err(|e| CoreError::StorageRead {
            key: key.to_string(),
            message: format!("{}: {}", self.path.display(), e),
        })?;

        match content {
            Some(content) => Ok(self.parse_object(key, &content)?.remove(key)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        let _guard = self.io_lock.lock();
        let write_err = |message: String| CoreError::StorageWrite {
            key: key.to_string(),
            message,
        };

        // An unreadable file aborts the write; only corrupt JSON is replaced
        let content = self
            .read_file()
            .map_err(|e| write_err(format!("{}: {}", self.path.display(), e)))?;

        let mut object = match content {
            Some(content) => self.parse_object(key, &content).unwrap_or_else(|e| {
                warn!(error = %e, "Replacing corrupt storage file");
                Map::new()
            }),
            None => Map::new(),
        };
        object.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| write_err(format!("{}: {}", parent.display(), e)))?;
        }

        let content = serde_json::to_string_pretty(&Value::Object(object))
            .map_err(|e| write_err(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| write_err(format!("{}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| write_err(format!("{}: {}", self.path.display(), e)))
    }
}

enum WriteOp {
    Save(Value),
    Flush(oneshot::Sender<()>),
}

/// Durable handle -> record map
///
/// Cheap to clone; all clones share one writer task.
#[derive(Clone)]
pub struct CacheStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    writer: mpsc::UnboundedSender<WriteOp>,
    state: Arc<RwLock<DegradedState>>,
}

impl CacheStore {
    /// Create the store and spawn its writer task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>, event_bus: EventBus) -> Self {
        let key = key.into();
        let state = Arc::new(RwLock::new(DegradedState::Healthy));
        let (writer, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(
            kv.clone(),
            key.clone(),
            rx,
            state.clone(),
            event_bus,
        ));

        Self {
            kv,
            key,
            writer,
            state,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn degraded_state(&self) -> DegradedState {
        self.state.read().clone()
    }

    /// Read every persisted record
    ///
    /// Never fails: unreadable storage yields an empty map, and malformed
    /// entries are skipped one by one.
    pub async fn load(&self) -> CacheSnapshot {
        let kv = self.kv.clone();
        let key = self.key.clone();
        let result = tokio::task::spawn_blocking(move || kv.get(&key)).await;

        let value = match result {
            Ok(Ok(Some(value))) => value,
            Ok(Ok(None)) => {
                debug!(key = %self.key, "No persisted cache found");
                return CacheSnapshot::new();
            }
            Ok(Err(e)) => {
                warn!(key = %self.key, error = %e, "Failed to load persisted cache, starting empty");
                return CacheSnapshot::new();
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Cache load task failed, starting empty");
                return CacheSnapshot::new();
            }
        };

        let records = decode_snapshot(value);
        info!(key = %self.key, records = records.len(), "Loaded persisted cache");
        records
    }

    /// Queue a full snapshot for writing (fire-and-forget)
    pub fn save(&self, snapshot: &CacheSnapshot) {
        let value = match serde_json::to_value(snapshot) {
            Ok(value) => value,
            Err(e) => {
                let err = CoreError::Serialize {
                    what: "cache snapshot",
                    source: e,
                };
                warn!(error = %err, "Skipping cache save");
                return;
            }
        };

        if self.writer.send(WriteOp::Save(value)).is_err() {
            warn!(key = %self.key, "Cache writer stopped, snapshot dropped");
        }
    }

    /// Wait until every snapshot queued so far has been written
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(WriteOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_writer(
    kv: Arc<dyn KeyValueStore>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    state: Arc<RwLock<DegradedState>>,
    event_bus: EventBus,
) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Save(value) => {
                let kv = kv.clone();
                let write_key = key.clone();
                let result = tokio::task::spawn_blocking(move || kv.set(&write_key, value))
                    .await
                    .unwrap_or_else(|e| {
                        Err(CoreError::StorageWrite {
                            key: key.clone(),
                            message: e.to_string(),
                        })
                    });

                match result {
                    Ok(()) => debug!(key = %key, "Cache persisted"),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to persist cache, continuing in memory");
                        *state.write() = DegradedState::MemoryOnly {
                            reason: e.to_string(),
                        };
                        event_bus.publish(EnrichEvent::StorageFailed(e.to_string()));
                    }
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(key = %key, "Cache writer stopped");
}

fn decode_snapshot(value: Value) -> CacheSnapshot {
    let Value::Object(entries) = value else {
        warn!("Persisted cache is not an object, ignoring it");
        return CacheSnapshot::new();
    };

    let mut records = CacheSnapshot::with_capacity(entries.len());
    for (handle, raw) in entries {
        match serde_json::from_value::<CacheRecord>(raw) {
            Ok(record) => {
                records.insert(handle, record);
            }
            Err(e) => {
                let err = CoreError::StorageDecode {
                    handle,
                    message: e.to_string(),
                };
                warn!(error = %err, "Skipping persisted record");
            }
        }
    }
    records
}
