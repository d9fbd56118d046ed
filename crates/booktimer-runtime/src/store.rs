//! Persisted key/value store and the coalescing write queue in front of it.
//!
//! The store holds a single JSON object keyed by the `rt_*` names in
//! [`booktimer_core::ledger::keys`]. All mutations go through
//! [`WriteQueue`], which merges queued patches into one write and
//! swallows failures; the in-memory ledger stays authoritative and the
//! next write carries its state.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};

pub type StoreMap = Map<String, Value>;
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("store file {path} is not a JSON object: {detail}")]
    Malformed { path: PathBuf, detail: String },
}

/// Durable key/value storage.
pub trait KvStore: Send + Sync + 'static {
    /// Every persisted key.
    fn load(&self) -> StoreFuture<'_, StoreMap>;

    /// Shallow-merge `patch` into the stored object.
    fn write(&self, patch: StoreMap) -> StoreFuture<'_, ()>;
}

// ─── JSON file ────────────────────────────────────────────────────

/// One JSON document on disk, replaced atomically on every write.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<Option<StoreMap>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<StoreMap, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(StoreMap::new());
        }
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(StoreError::Malformed {
                path: self.path.clone(),
                detail: format!("top-level value is {}", json_kind(&other)),
            }),
            Err(e) => Err(StoreError::Malformed {
                path: self.path.clone(),
                detail: e.to_string(),
            }),
        }
    }

    async fn persist(&self, map: &StoreMap) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        }
        let body = serde_json::to_vec_pretty(map).map_err(|e| StoreError::Malformed {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn load(&self) -> StoreFuture<'_, StoreMap> {
        Box::pin(async move {
            let mut cache = self.cache.lock().await;
            if let Some(map) = cache.as_ref() {
                return Ok(map.clone());
            }
            let map = self.read_file().await?;
            *cache = Some(map.clone());
            Ok(map)
        })
    }

    fn write(&self, patch: StoreMap) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut cache = self.cache.lock().await;
            let mut next = match cache.as_ref() {
                Some(map) => map.clone(),
                None => self.read_file().await?,
            };
            next.extend(patch);
            self.persist(&next).await?;
            *cache = Some(next);
            Ok(())
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─── In memory ────────────────────────────────────────────────────

#[cfg(test)]
pub use memory::MemoryStore;

#[cfg(test)]
mod memory {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Volatile store for tests, with write-failure injection.
    #[derive(Default)]
    pub struct MemoryStore {
        data: StdMutex<StoreMap>,
        failing: AtomicBool,
        writes: AtomicUsize,
    }

    impl MemoryStore {
        pub fn with_data(data: StoreMap) -> Self {
            Self {
                data: StdMutex::new(data),
                ..Self::default()
            }
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn snapshot(&self) -> StoreMap {
            self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        /// Successful writes so far.
        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl KvStore for MemoryStore {
        fn load(&self) -> StoreFuture<'_, StoreMap> {
            Box::pin(async move { Ok(self.snapshot()) })
        }

        fn write(&self, patch: StoreMap) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(StoreError::Io {
                        path: PathBuf::from("memory"),
                        source: io::Error::other("injected write failure"),
                    });
                }
                self.data
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend(patch);
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }
}

// ─── Write queue ──────────────────────────────────────────────────

enum WriteOp {
    Patch(StoreMap),
    Barrier(oneshot::Sender<()>),
}

/// Single writer in front of a [`KvStore`]. Patches queued while a
/// write is in progress are merged (later keys win) into the next one.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl WriteQueue {
    pub fn spawn(store: Arc<dyn KvStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, rx));
        Self { tx }
    }

    pub fn enqueue(&self, patch: StoreMap) {
        if patch.is_empty() {
            return;
        }
        if self.tx.send(WriteOp::Patch(patch)).is_err() {
            tracing::warn!("write queue closed, dropping patch");
        }
    }

    /// Wait until everything enqueued before this call has been attempted.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WriteOp::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_writer(store: Arc<dyn KvStore>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(first) = rx.recv().await {
        let mut batch = StoreMap::new();
        let mut waiters = Vec::new();
        let mut absorb = |op| match op {
            WriteOp::Patch(patch) => batch.extend(patch),
            WriteOp::Barrier(done) => waiters.push(done),
        };
        absorb(first);
        while let Ok(op) = rx.try_recv() {
            absorb(op);
        }

        if !batch.is_empty() {
            let keys = batch.len();
            match store.write(batch).await {
                Ok(()) => tracing::debug!(keys, "store write"),
                Err(e) => tracing::warn!(keys, error = %e, "store write failed"),
            }
        }
        for done in waiters {
            let _ = done.send(());
        }
    }
    tracing::debug!("write queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(key: &str, value: Value) -> StoreMap {
        let mut map = StoreMap::new();
        map.insert(key.to_string(), value);
        map
    }

    // ── 1. Write queue ──────────────────────────────────────────────

    #[tokio::test]
    async fn queued_patches_coalesce_into_one_write() {
        let store = Arc::new(MemoryStore::default());
        let queue = WriteQueue::spawn(store.clone());
        queue.enqueue(patch("rt_total_ms", json!(1)));
        queue.enqueue(patch("rt_total_ms", json!(2)));
        queue.enqueue(patch("rt_daily_ms", json!(5)));
        queue.flush().await;

        assert_eq!(store.write_count(), 1);
        let data = store.snapshot();
        assert_eq!(data["rt_total_ms"], json!(2));
        assert_eq!(data["rt_daily_ms"], json!(5));
    }

    #[tokio::test]
    async fn failed_write_is_swallowed_and_next_write_lands() {
        let store = Arc::new(MemoryStore::default());
        let queue = WriteQueue::spawn(store.clone());
        store.set_failing(true);
        queue.enqueue(patch("rt_total_ms", json!(10)));
        queue.flush().await;
        assert!(store.snapshot().is_empty());

        store.set_failing(false);
        queue.enqueue(patch("rt_total_ms", json!(20)));
        queue.flush().await;
        assert_eq!(store.snapshot()["rt_total_ms"], json!(20));
    }

    #[tokio::test]
    async fn empty_patch_is_not_written() {
        let store = Arc::new(MemoryStore::default());
        let queue = WriteQueue::spawn(store.clone());
        queue.enqueue(StoreMap::new());
        queue.flush().await;
        assert_eq!(store.write_count(), 0);
    }

    // ── 2. JSON file ────────────────────────────────────────────────

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/store.json");

        let store = JsonFileStore::new(&path);
        assert!(store.load().await.expect("load empty").is_empty());
        store
            .write(patch("rt_total_ms", json!(42)))
            .await
            .expect("write");
        store
            .write(patch("rt_site_enable", json!({"pixiv.net": false})))
            .await
            .expect("write");

        let reopened = JsonFileStore::new(&path);
        let data = reopened.load().await.expect("load");
        assert_eq!(data["rt_total_ms"], json!(42));
        assert_eq!(data["rt_site_enable"]["pixiv.net"], json!(false));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_non_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "[1, 2]").expect("seed file");

        let err = JsonFileStore::new(&path).load().await.expect_err("array rejected");
        assert!(matches!(err, StoreError::Malformed { .. }), "{err}");
    }
}
