//! Conversation history seam, in-memory store and per-session locks

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// What an assistant turn remembers about the query that produced it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn assistant(content: impl Into<String>, metadata: TurnMetadata) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Some(metadata),
        }
    }

    pub fn sql(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.sql.as_deref())
    }

    pub fn row_count(&self) -> usize {
        self.metadata.as_ref().map_or(0, |m| m.row_count)
    }
}

/// Session-scoped, append-only conversation history.
///
/// Implementations trim each session to their own maximum length.
pub trait HistoryStore: Send + Sync {
    fn append(&self, session_id: &str, turn: ConversationTurn) -> anyhow::Result<()>;
    /// The `n` most recent turns, oldest first
    fn get_recent(&self, session_id: &str, n: usize) -> anyhow::Result<Vec<ConversationTurn>>;
    fn clear(&self, session_id: &str) -> anyhow::Result<()>;

    /// Store a question and its answer together. Stores that can should make
    /// the pair atomic: either both turns are kept or neither is.
    fn append_exchange(
        &self,
        session_id: &str,
        user: ConversationTurn,
        assistant: ConversationTurn,
    ) -> anyhow::Result<()> {
        self.append(session_id, user)?;
        self.append(session_id, assistant)
    }
}

#[derive(Clone)]
pub struct InMemoryHistoryStore {
    store: Arc<DashMap<String, Vec<ConversationTurn>>>,
    max_messages: usize,
}

impl InMemoryHistoryStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            max_messages: max_messages.max(1),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(20)
    }
}

impl InMemoryHistoryStore {
    fn push_turns(&self, session_id: &str, turns: impl IntoIterator<Item = ConversationTurn>) {
        let mut entry = self.store.entry(session_id.to_string()).or_default();
        entry.extend(turns);
        if entry.len() > self.max_messages {
            let excess = entry.len() - self.max_messages;
            entry.drain(..excess);
        }
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(&self, session_id: &str, turn: ConversationTurn) -> anyhow::Result<()> {
        self.push_turns(session_id, [turn]);
        Ok(())
    }

    fn append_exchange(
        &self,
        session_id: &str,
        user: ConversationTurn,
        assistant: ConversationTurn,
    ) -> anyhow::Result<()> {
        self.push_turns(session_id, [user, assistant]);
        Ok(())
    }

    fn get_recent(&self, session_id: &str, n: usize) -> anyhow::Result<Vec<ConversationTurn>> {
        Ok(match self.store.get(session_id) {
            Some(history) => {
                let start = history.len().saturating_sub(n);
                history[start..].to_vec()
            }
            None => Vec::new(),
        })
    }

    fn clear(&self, session_id: &str) -> anyhow::Result<()> {
        self.store.remove(session_id);
        Ok(())
    }
}

/// One async mutex per session: a question holds its session's lock from the
/// history read to the memory write, while other sessions proceed independently.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for a session nobody is currently using
    pub fn release_idle(&self, session_id: &str) {
        self.locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
