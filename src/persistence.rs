//! Persistence Contract: the append-only log abstraction the orchestrator
//! writes every conversation mutation through, plus one reference
//! implementation.
//!
//! The canonical backend this contract is sized for is a SQLite store,
//! which is out of scope here; [`PersistenceStore`] is an in-process
//! stand-in — a `parking_lot::RwLock` over plain `HashMap`s, optionally
//! mirrored to a JSON file — that gives the orchestrator and its tests a
//! real, runnable implementation without a SQL engine.

use crate::error::Error;
use crate::types::{Message, MessageRole, Session};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One row of the `messages` table: a message plus its session-scoped
/// sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub seq: u64,
    pub role: MessageRole,
    pub content: Vec<crate::types::ContentBlock>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl StoredMessage {
    fn from_message(seq: u64, message: &Message) -> Self {
        Self {
            seq,
            role: message.role,
            content: message.content.clone(),
            created_at: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
    pub id: uuid::Uuid,
    pub session_id: uuid::Uuid,
    pub tool_name: String,
    pub content: Vec<u8>,
    pub size: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub working_dir: String,
    pub tag: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// The append-only log abstraction every conversation mutation is written
/// through. Implementations must serialize `append_message` calls for the
/// same `session_id` so sequence allocation is atomic under concurrent
/// callers.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create_session(&self, session: Session) -> Result<()>;
    async fn get_session(&self, id: uuid::Uuid) -> Result<Option<Session>>;
    /// Most-recently-updated first, capped at `limit`.
    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>>;

    /// Allocates a sequence number strictly greater than every existing
    /// `seq` for `session_id` and appends the message.
    async fn append_message(&self, session_id: uuid::Uuid, message: &Message) -> Result<u64>;
    /// Returns messages in `seq` order.
    async fn get_messages(&self, session_id: uuid::Uuid) -> Result<Vec<StoredMessage>>;

    async fn save_blob(&self, session_id: uuid::Uuid, tool_name: &str, bytes: Vec<u8>) -> Result<uuid::Uuid>;
    async fn get_blob(&self, id: uuid::Uuid) -> Result<Option<BlobRecord>>;

    /// Upserts on `(working_dir, tag)`.
    async fn save_memory(&self, working_dir: &str, tag: &str, content: &str) -> Result<()>;
    async fn load_memories(&self, working_dir: &str) -> Result<Vec<MemoryRecord>>;
}

/// The compact placeholder left in a conversation when a tool result
/// exceeds the configured offload threshold, per the external-interface
/// format: instructs the model to retrieve the rest via `read_result`.
pub fn offload_reference(blob_id: uuid::Uuid, tool_name: &str, size: usize, text: &str) -> String {
    let preview: String = text.chars().take(200).collect();
    format!(
        "[Tool result stored — {size} bytes from \"{tool_name}\". First 200 chars: {preview}] Use the \"read_result\" tool with ref_id={blob_id}"
    )
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<uuid::Uuid, Session>,
    messages: HashMap<uuid::Uuid, Vec<StoredMessage>>,
    blobs: HashMap<uuid::Uuid, BlobRecord>,
    memories: HashMap<(String, String), MemoryRecord>,
}

/// In-process reference implementation of [`Persistence`], optionally
/// mirrored to a JSON file on [`PersistenceStore::flush`] and loaded from
/// one on [`PersistenceStore::open`]. Concurrent `append_message` calls for
/// the same session serialize through the single `RwLock` write guard,
/// satisfying the sequence-allocation atomicity requirement.
pub struct PersistenceStore {
    path: Option<PathBuf>,
    tables: RwLock<Tables>,
    log_sink: Box<dyn Fn(&Error) + Send + Sync>,
}

#[derive(Default, Serialize, Deserialize)]
struct SerializedTables {
    sessions: HashMap<uuid::Uuid, Session>,
    messages: HashMap<uuid::Uuid, Vec<StoredMessage>>,
    blobs: HashMap<uuid::Uuid, BlobRecord>,
    #[serde(default)]
    memories: Vec<MemoryRecord>,
}

impl PersistenceStore {
    /// An in-memory-only store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: RwLock::new(Tables::default()),
            log_sink: Box::new(|err| tracing::error!(target: "persistence", "{err}")),
        }
    }

    /// Loads state from `path` if it exists, otherwise starts empty; state
    /// is only written back on explicit [`PersistenceStore::flush`] calls.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let tables = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| Error::other(e.to_string()))?;
            let serialized: SerializedTables = serde_json::from_str(&raw).unwrap_or_default();
            Tables {
                sessions: serialized.sessions,
                messages: serialized.messages,
                blobs: serialized.blobs,
                memories: serialized
                    .memories
                    .into_iter()
                    .map(|m| ((m.working_dir.clone(), m.tag.clone()), m))
                    .collect(),
            }
        } else {
            Tables::default()
        };

        tracing::info!(sessions = tables.sessions.len(), path = %path.display(), "persistence store loaded");

        Ok(Self {
            path: Some(path),
            tables: RwLock::new(tables),
            log_sink: Box::new(|err| tracing::error!(target: "persistence", "{err}")),
        })
    }

    pub fn with_log_sink(mut self, sink: Box<dyn Fn(&Error) + Send + Sync>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let tables = self.tables.read();
        let serialized = SerializedTables {
            sessions: tables.sessions.clone(),
            messages: tables.messages.clone(),
            blobs: tables.blobs.clone(),
            memories: tables.memories.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&serialized).map_err(Error::Json)?;
        std::fs::write(path, json).map_err(|e| Error::other(e.to_string()))?;
        Ok(())
    }

    /// Non-fatal wrapper: logs via the injected sink instead of propagating,
    /// matching the contract's "persistence failures never break the event
    /// stream" guarantee. Callers in the orchestrator use this instead of
    /// `?` on a `Persistence` call.
    pub fn log_failure(&self, err: &Error) {
        (self.log_sink)(err);
    }
}

#[async_trait]
impl Persistence for PersistenceStore {
    async fn create_session(&self, session: Session) -> Result<()> {
        self.tables.write().sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: uuid::Uuid) -> Result<Option<Session>> {
        Ok(self.tables.read().sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let tables = self.tables.read();
        let mut sessions: Vec<Session> = tables.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn append_message(&self, session_id: uuid::Uuid, message: &Message) -> Result<u64> {
        let mut tables = self.tables.write();
        let log = tables.messages.entry(session_id).or_default();
        let next_seq = log.last().map(|m| m.seq + 1).unwrap_or(0);
        log.push(StoredMessage::from_message(next_seq, message));

        if let Some(session) = tables.sessions.get_mut(&session_id) {
            session.updated_at = chrono::Utc::now();
        }

        Ok(next_seq)
    }

    async fn get_messages(&self, session_id: uuid::Uuid) -> Result<Vec<StoredMessage>> {
        let tables = self.tables.read();
        let mut messages = tables.messages.get(&session_id).cloned().unwrap_or_default();
        messages.sort_by_key(|m| m.seq);
        Ok(messages)
    }

    async fn save_blob(&self, session_id: uuid::Uuid, tool_name: &str, bytes: Vec<u8>) -> Result<uuid::Uuid> {
        let id = uuid::Uuid::new_v4();
        let size = bytes.len();
        let record = BlobRecord {
            id,
            session_id,
            tool_name: tool_name.to_string(),
            content: bytes,
            size,
            created_at: chrono::Utc::now(),
        };
        self.tables.write().blobs.insert(id, record);
        Ok(id)
    }

    async fn get_blob(&self, id: uuid::Uuid) -> Result<Option<BlobRecord>> {
        Ok(self.tables.read().blobs.get(&id).cloned())
    }

    async fn save_memory(&self, working_dir: &str, tag: &str, content: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let key = (working_dir.to_string(), tag.to_string());
        let now = chrono::Utc::now();

        tables
            .memories
            .entry(key)
            .and_modify(|existing| {
                existing.content = content.to_string();
                existing.updated_at = now;
            })
            .or_insert_with(|| MemoryRecord {
                working_dir: working_dir.to_string(),
                tag: tag.to_string(),
                content: content.to_string(),
                created_at: now,
                updated_at: now,
            });

        Ok(())
    }

    async fn load_memories(&self, working_dir: &str) -> Result<Vec<MemoryRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .memories
            .values()
            .filter(|m| m.working_dir == working_dir)
            .cloned()
            .collect())
    }
}
