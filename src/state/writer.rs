//! Dedicated writer thread for the SQLite session store.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, error, warn};

use super::{CompletionRecord, state_err, state_err_with};
use crate::error::Result;

pub(super) enum WriteCommand {
    Put {
        session_id: String,
        key: String,
        value: String,
        response: tokio::sync::oneshot::Sender<Result<()>>,
    },
    InitPhase {
        session_id: String,
        phase: u32,
        required: u32,
        response: tokio::sync::oneshot::Sender<Result<()>>,
    },
    RecordCompletion {
        session_id: String,
        phase: u32,
        group_id: String,
        outcome: String,
        response: tokio::sync::oneshot::Sender<Result<CompletionRecord>>,
    },
    Shutdown,
}

pub(super) struct StoreWriter {
    tx: Sender<WriteCommand>,
    handle: Option<JoinHandle<()>>,
}

impl StoreWriter {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("store-writer".into())
            .spawn(move || match Self::init_db(&db_path) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    Self::process_commands(&conn, rx);
                }
                Err(e) => {
                    error!(error = %e, "Store writer init failed");
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| state_err_with("Failed to spawn writer thread", e))?;

        ready_rx
            .recv()
            .map_err(|_| state_err("Writer thread died during init"))??;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Sender<WriteCommand> {
        self.tx.clone()
    }

    fn init_db(db_path: &PathBuf) -> Result<Connection> {
        let conn =
            Connection::open(db_path).map_err(|e| state_err_with("Failed to open database", e))?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS kv (
                session_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (session_id, key)
            );

            CREATE TABLE IF NOT EXISTS phase_counters (
                session_id TEXT NOT NULL,
                phase INTEGER NOT NULL,
                required INTEGER NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (session_id, phase)
            );

            CREATE TABLE IF NOT EXISTS group_completions (
                session_id TEXT NOT NULL,
                phase INTEGER NOT NULL,
                group_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (session_id, phase, group_id)
            );

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );
            INSERT OR IGNORE INTO schema_version VALUES (1);
            ",
        )
        .map_err(|e| state_err_with("Failed to init schema", e))?;

        Ok(())
    }

    fn process_commands(conn: &Connection, rx: Receiver<WriteCommand>) {
        for cmd in rx {
            match cmd {
                WriteCommand::Put {
                    session_id,
                    key,
                    value,
                    response,
                } => {
                    let result = Self::put(conn, &session_id, &key, &value);
                    let _ = response.send(result);
                }
                WriteCommand::InitPhase {
                    session_id,
                    phase,
                    required,
                    response,
                } => {
                    let result = Self::init_phase(conn, &session_id, phase, required);
                    let _ = response.send(result);
                }
                WriteCommand::RecordCompletion {
                    session_id,
                    phase,
                    group_id,
                    outcome,
                    response,
                } => {
                    let result =
                        Self::record_completion(conn, &session_id, phase, &group_id, &outcome);
                    let _ = response.send(result);
                }
                WriteCommand::Shutdown => {
                    debug!("Writer thread received shutdown signal");
                    break;
                }
            }
        }
    }

    fn put(conn: &Connection, session_id: &str, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO kv (session_id, key, value, updated_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT (session_id, key) DO UPDATE SET value = ?3, updated_at = ?4",
            params![
                session_id,
                key,
                value,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| state_err_with("Failed to put value", e))?;

        debug!(session_id, key, "Value stored");
        Ok(())
    }

    /// Idempotent: re-initializing an existing phase keeps its completed
    /// count. A mismatched required count is rejected rather than silently
    /// resized.
    fn init_phase(conn: &Connection, session_id: &str, phase: u32, required: u32) -> Result<()> {
        let existing: Option<u32> = conn
            .query_row(
                "SELECT required FROM phase_counters WHERE session_id = ?1 AND phase = ?2",
                params![session_id, phase],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| state_err_with("Failed to read phase counter", e))?;

        match existing {
            Some(current) if current != required => Err(state_err(format!(
                "Phase {} already initialized with required={}, got {}",
                phase, current, required
            ))),
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT INTO phase_counters (session_id, phase, required, completed)
                       VALUES (?1, ?2, ?3, 0)",
                    params![session_id, phase, required],
                )
                .map_err(|e| state_err_with("Failed to init phase counter", e))?;

                debug!(session_id, phase, required, "Phase counter initialized");
                Ok(())
            }
        }
    }

    /// Compare-and-increment in one transaction: the already-counted check,
    /// the completion row, and the counter bump commit together or not at
    /// all. A repeated group id returns the existing count untouched.
    fn record_completion(
        conn: &Connection,
        session_id: &str,
        phase: u32,
        group_id: &str,
        outcome: &str,
    ) -> Result<CompletionRecord> {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| state_err_with("Failed to start transaction", e))?;

        let counts: Option<(u32, u32)> = tx
            .query_row(
                "SELECT required, completed FROM phase_counters
                   WHERE session_id = ?1 AND phase = ?2",
                params![session_id, phase],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| state_err_with("Failed to read phase counter", e))?;

        let Some((required, completed)) = counts else {
            return Err(crate::error::ForemanError::PhaseNotInitialized(phase));
        };

        let already: bool = tx
            .query_row(
                "SELECT 1 FROM group_completions
                   WHERE session_id = ?1 AND phase = ?2 AND group_id = ?3",
                params![session_id, phase, group_id],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| state_err_with("Failed to check completion set", e))?
            .is_some();

        if already {
            return Ok(CompletionRecord {
                completed,
                required,
                duplicate: true,
            });
        }

        if completed >= required {
            return Err(state_err(format!(
                "Phase {} counter already at {}/{}",
                phase, completed, required
            )));
        }

        tx.execute(
            "INSERT INTO group_completions (session_id, phase, group_id, outcome, recorded_at)
               VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                phase,
                group_id,
                outcome,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| state_err_with("Failed to record completion", e))?;

        let new_completed = completed + 1;
        tx.execute(
            "UPDATE phase_counters SET completed = ?1
               WHERE session_id = ?2 AND phase = ?3",
            params![new_completed, session_id, phase],
        )
        .map_err(|e| state_err_with("Failed to increment counter", e))?;

        tx.commit()
            .map_err(|e| state_err_with("Failed to commit completion", e))?;

        debug!(
            session_id,
            phase,
            group_id,
            completed = new_completed,
            required,
            "Group completion recorded"
        );

        Ok(CompletionRecord {
            completed: new_completed,
            required,
            duplicate: false,
        })
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(WriteCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            warn!("Writer thread panicked: {:?}", e);
        }
    }
}
