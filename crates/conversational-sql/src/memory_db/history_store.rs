//! SQLite-backed conversation history

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

use crate::memory::{ConversationTurn, HistoryStore, Role, TurnMetadata};
use crate::memory_db::schema::HistoryStats;

pub struct SqliteHistoryStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
    max_messages: usize,
}

impl SqliteHistoryStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>, max_messages: usize) -> Self {
        Self {
            pool,
            max_messages: max_messages.max(1),
        }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn stats(&self) -> anyhow::Result<HistoryStats> {
        let conn = self.get_conn()?;
        let total_sessions = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let total_turns = conn.query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))?;
        Ok(HistoryStats {
            total_sessions,
            total_turns,
        })
    }

    /// Remove sessions not touched since `older_than`, returning how many were dropped
    pub fn cleanup_sessions_before(&self, older_than: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut conn = self.get_conn()?;
        let cutoff = older_than.to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM turns WHERE session_id IN
                (SELECT session_id FROM sessions WHERE last_accessed < ?1)",
            params![cutoff],
        )?;
        let deleted = tx.execute("DELETE FROM sessions WHERE last_accessed < ?1", params![cutoff])?;
        tx.commit()?;
        Ok(deleted)
    }

    fn touch_session(conn: &Connection, session_id: &str, now: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO sessions (session_id, created_at, last_accessed) VALUES (?1, ?2, ?2)
             ON CONFLICT(session_id) DO UPDATE SET last_accessed = excluded.last_accessed",
            params![session_id, now],
        )?;
        Ok(())
    }

    /// Insert turns, touch the session and trim it in one transaction
    fn insert_turns(&self, session_id: &str, turns: &[ConversationTurn]) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        Self::touch_session(&tx, session_id, &now)?;
        for turn in turns {
            let metadata = turn.metadata.as_ref().map(serde_json::to_string).transpose()?;
            tx.execute(
                "INSERT INTO turns (session_id, role, content, timestamp, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id,
                    turn.role.as_str(),
                    turn.content,
                    turn.timestamp.to_rfc3339(),
                    metadata,
                ],
            )?;
        }
        let trimmed = tx.execute(
            "DELETE FROM turns WHERE session_id = ?1 AND id NOT IN
                (SELECT id FROM turns WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2)",
            params![session_id, self.max_messages as i64],
        )?;
        tx.commit()?;

        if trimmed > 0 {
            debug!("Trimmed {} old turns from session {}", trimmed, session_id);
        }
        Ok(())
    }

    fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn row_to_turn(row: &Row) -> anyhow::Result<ConversationTurn> {
        let role_raw: String = row.get(0)?;
        let role = Role::parse(&role_raw)
            .ok_or_else(|| anyhow::anyhow!("Unknown role in history: {}", role_raw))?;

        let timestamp = Self::parse_datetime_safe(&row.get::<_, String>(2)?).unwrap_or_else(|| {
            warn!("Failed to parse turn timestamp");
            Utc::now()
        });

        let metadata = match row.get::<_, Option<String>>(3)? {
            Some(json) => Some(
                serde_json::from_str::<TurnMetadata>(&json)
                    .map_err(|e| anyhow::anyhow!("Metadata JSON error: {}", e))?,
            ),
            None => None,
        };

        Ok(ConversationTurn {
            role,
            content: row.get(1)?,
            timestamp,
            metadata,
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, session_id: &str, turn: ConversationTurn) -> anyhow::Result<()> {
        self.insert_turns(session_id, &[turn])
    }

    fn append_exchange(
        &self,
        session_id: &str,
        user: ConversationTurn,
        assistant: ConversationTurn,
    ) -> anyhow::Result<()> {
        self.insert_turns(session_id, &[user, assistant])
    }

    fn get_recent(&self, session_id: &str, n: usize) -> anyhow::Result<Vec<ConversationTurn>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT role, content, timestamp, metadata FROM turns
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![session_id, n as i64])?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.push(Self::row_to_turn(row)?);
        }
        turns.reverse();
        Ok(turns)
    }

    fn clear(&self, session_id: &str) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM turns WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
        tx.commit()?;
        Ok(())
    }
}
