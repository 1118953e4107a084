//! SQL schema for the conversation history database

/// Migration 1: one row per conversation turn
pub const MIGRATION_001_TURNS: &str = r#"
CREATE TABLE IF NOT EXISTS turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, id);
"#;

/// Migration 2: per-session bookkeeping, used to list and expire sessions
pub const MIGRATION_002_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL
);

INSERT OR IGNORE INTO sessions (session_id, created_at, last_accessed)
SELECT session_id, MIN(timestamp), MAX(timestamp) FROM turns GROUP BY session_id;
"#;

/// Row counts reported by [`crate::memory_db::SqliteHistoryStore::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub total_sessions: i64,
    pub total_turns: i64,
}
