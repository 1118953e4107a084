//! History database module - SQLite-backed storage for conversation turns
pub mod history_store;
pub mod migration;
pub mod schema;

pub use history_store::SqliteHistoryStore;
pub use migration::MigrationManager;
pub use schema::HistoryStats;

use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

/// Owns the connection pool; hands out stores that share it
pub struct HistoryDatabase {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl HistoryDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening history database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        info!("History database initialized successfully");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Single-connection in-memory database; every pooled connection would otherwise see its own empty file
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn history_store(&self, max_messages: usize) -> SqliteHistoryStore {
        SqliteHistoryStore::new(Arc::clone(&self.pool), max_messages)
    }
}
