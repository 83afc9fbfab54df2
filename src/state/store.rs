//! Concurrency-safe session store with dedicated writer thread and read pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::debug;

use super::{CompletionOutcome, CompletionRecord, state_err_with, unavailable};
use super::writer::{StoreWriter, WriteCommand};
use crate::error::Result;

const DEFAULT_READ_POOL_SIZE: usize = 4;

struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: std::sync::atomic::AtomicUsize,
}

impl ReadPool {
    fn new(db_path: &Path, size: usize) -> Result<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| state_err_with("Failed to open read connection", e))?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> parking_lot::MutexGuard<'_, Connection> {
        let idx =
            self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.connections.len();
        self.connections[idx].lock()
    }
}

struct StateStoreInner {
    writer_tx: Sender<WriteCommand>,
    read_pool: ReadPool,
    db_path: PathBuf,
    /// Holds the writer thread handle. Must not be dropped while the store is alive.
    #[allow(dead_code)]
    writer: StoreWriter,
}

/// Durable key/value and phase-counter store. Authoritative at runtime:
/// counters live here, never only in process memory.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StateStoreInner>,
}

impl StateStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_read_pool_size(db_path, DEFAULT_READ_POOL_SIZE)
    }

    pub fn with_read_pool_size(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| state_err_with("Failed to create db directory", e))?;
        }

        let writer = StoreWriter::new(db_path.clone())?;
        let writer_tx = writer.sender();

        let read_pool = ReadPool::new(&db_path, pool_size)?;

        Ok(Self {
            inner: Arc::new(StateStoreInner {
                writer_tx,
                read_pool,
                db_path,
                writer,
            }),
        })
    }

    pub async fn put(&self, session_id: &str, key: &str, value: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        self.inner
            .writer_tx
            .send(WriteCommand::Put {
                session_id: session_id.to_string(),
                key: key.to_string(),
                value: value.to_string(),
                response: tx,
            })
            .map_err(|_| unavailable("Writer thread disconnected"))?;

        rx.await
            .map_err(|_| unavailable("Writer response channel dropped"))?
    }

    pub async fn put_json<T: Serialize>(&self, session_id: &str, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.put(session_id, key, &raw).await
    }

    pub async fn get(&self, session_id: &str, key: &str) -> Result<Option<String>> {
        let session_id = session_id.to_string();
        let key = key.to_string();
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let guard = inner.read_pool.acquire();
            guard
                .query_row(
                    "SELECT value FROM kv WHERE session_id = ?1 AND key = ?2",
                    params![&session_id, &key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| state_err_with("Failed to read value", e))
        })
        .await
        .map_err(|e| state_err_with("Read task failed", e))?
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get(session_id, key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn init_phase(&self, session_id: &str, phase: u32, required: u32) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        self.inner
            .writer_tx
            .send(WriteCommand::InitPhase {
                session_id: session_id.to_string(),
                phase,
                required,
                response: tx,
            })
            .map_err(|_| unavailable("Writer thread disconnected"))?;

        rx.await
            .map_err(|_| unavailable("Writer response channel dropped"))?
    }

    /// Durable compare-and-increment keyed `(phase, group_id)`. A repeated
    /// group id is a no-op that returns the existing count with
    /// `duplicate = true`.
    pub async fn record_group_complete(
        &self,
        session_id: &str,
        phase: u32,
        group_id: &str,
        outcome: CompletionOutcome,
    ) -> Result<CompletionRecord> {
        let (tx, rx) = oneshot::channel();

        self.inner
            .writer_tx
            .send(WriteCommand::RecordCompletion {
                session_id: session_id.to_string(),
                phase,
                group_id: group_id.to_string(),
                outcome: outcome.as_str().to_string(),
                response: tx,
            })
            .map_err(|_| unavailable("Writer thread disconnected"))?;

        rx.await
            .map_err(|_| unavailable("Writer response channel dropped"))?
    }

    /// Returns `(required, completed)` for an initialized phase.
    pub async fn phase_counts(&self, session_id: &str, phase: u32) -> Result<Option<(u32, u32)>> {
        let session_id = session_id.to_string();
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let guard = inner.read_pool.acquire();
            guard
                .query_row(
                    "SELECT required, completed FROM phase_counters
                       WHERE session_id = ?1 AND phase = ?2",
                    params![&session_id, phase],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| state_err_with("Failed to read phase counts", e))
        })
        .await
        .map_err(|e| state_err_with("Read task failed", e))?
    }

    /// Group ids that reached a terminal outcome in the phase, with the
    /// recorded outcome for each.
    pub async fn completed_groups(
        &self,
        session_id: &str,
        phase: u32,
    ) -> Result<Vec<(String, CompletionOutcome)>> {
        let session_id = session_id.to_string();
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let guard = inner.read_pool.acquire();
            let mut stmt = guard
                .prepare(
                    "SELECT group_id, outcome FROM group_completions
                       WHERE session_id = ?1 AND phase = ?2
                       ORDER BY recorded_at ASC",
                )
                .map_err(|e| state_err_with("Failed to prepare statement", e))?;

            let rows = stmt
                .query_map(params![&session_id, phase], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| state_err_with("Failed to query completions", e))?;

            let mut groups = Vec::new();
            for row in rows {
                let (group_id, outcome) =
                    row.map_err(|e| state_err_with("Failed to read row", e))?;
                groups.push((group_id, CompletionOutcome::parse(&outcome)?));
            }

            debug!(
                session_id,
                phase,
                count = groups.len(),
                "Completed groups queried"
            );

            Ok(groups)
        })
        .await
        .map_err(|e| state_err_with("Read task failed", e))?
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, StateStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test_state.db");
        let store = StateStore::open(&db_path).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (_dir, store) = temp_store();

        store.put("s-1", "alpha", "one").await.unwrap();
        assert_eq!(store.get("s-1", "alpha").await.unwrap().unwrap(), "one");

        store.put("s-1", "alpha", "two").await.unwrap();
        assert_eq!(store.get("s-1", "alpha").await.unwrap().unwrap(), "two");

        assert!(store.get("s-1", "missing").await.unwrap().is_none());
        assert!(store.get("s-2", "alpha").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_init_phase_idempotent() {
        let (_dir, store) = temp_store();

        store.init_phase("s-1", 0, 4).await.unwrap();
        store.init_phase("s-1", 0, 4).await.unwrap();

        let (required, completed) = store.phase_counts("s-1", 0).await.unwrap().unwrap();
        assert_eq!(required, 4);
        assert_eq!(completed, 0);
    }

    #[tokio::test]
    async fn test_init_phase_rejects_resize() {
        let (_dir, store) = temp_store();

        store.init_phase("s-1", 0, 4).await.unwrap();
        assert!(store.init_phase("s-1", 0, 5).await.is_err());
    }

    #[tokio::test]
    async fn test_record_completion_increments() {
        let (_dir, store) = temp_store();
        store.init_phase("s-1", 0, 2).await.unwrap();

        let rec = store
            .record_group_complete("s-1", 0, "g-1", CompletionOutcome::Completed)
            .await
            .unwrap();
        assert_eq!(rec.completed, 1);
        assert!(!rec.duplicate);

        let rec = store
            .record_group_complete("s-1", 0, "g-2", CompletionOutcome::PartialFailure)
            .await
            .unwrap();
        assert_eq!(rec.completed, 2);
        assert!(rec.is_phase_complete());
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_noop() {
        let (_dir, store) = temp_store();
        store.init_phase("s-1", 0, 3).await.unwrap();

        store
            .record_group_complete("s-1", 0, "g-1", CompletionOutcome::Completed)
            .await
            .unwrap();

        for _ in 0..5 {
            let rec = store
                .record_group_complete("s-1", 0, "g-1", CompletionOutcome::Completed)
                .await
                .unwrap();
            assert_eq!(rec.completed, 1);
            assert!(rec.duplicate);
        }
    }

    #[tokio::test]
    async fn test_completion_requires_initialized_phase() {
        let (_dir, store) = temp_store();

        let result = store
            .record_group_complete("s-1", 7, "g-1", CompletionOutcome::Completed)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_completions_count_once_per_group() {
        let (_dir, store) = temp_store();
        store.init_phase("s-1", 0, 20).await.unwrap();

        // Every group reports three times, interleaved across tasks.
        let handles: Vec<_> = (0..20)
            .flat_map(|g| (0..3).map(move |_| g))
            .map(|g| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record_group_complete(
                            "s-1",
                            0,
                            &format!("g-{}", g),
                            CompletionOutcome::Completed,
                        )
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        assert!(results.iter().all(|r| r.as_ref().unwrap().is_ok()));

        let (required, completed) = store.phase_counts("s-1", 0).await.unwrap().unwrap();
        assert_eq!(required, 20);
        assert_eq!(completed, 20);
    }

    #[tokio::test]
    async fn test_counts_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state.db");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.init_phase("s-1", 0, 4).await.unwrap();
            store
                .record_group_complete("s-1", 0, "g-1", CompletionOutcome::Completed)
                .await
                .unwrap();
            store
                .record_group_complete("s-1", 0, "g-2", CompletionOutcome::Completed)
                .await
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let (required, completed) = store.phase_counts("s-1", 0).await.unwrap().unwrap();
        assert_eq!((required, completed), (4, 2));

        let groups = store.completed_groups("s-1", 0).await.unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let (_dir, store1) = temp_store();
        let store2 = store1.clone();

        store1.put("s-1", "key", "value").await.unwrap();
        assert_eq!(store2.get("s-1", "key").await.unwrap().unwrap(), "value");
    }
}
