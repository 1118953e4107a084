//! Conversational text-to-SQL orchestration core

pub mod analytics;
pub mod catalog;
pub mod config;
pub mod context_engine;
pub mod error;
pub mod execution;
pub mod generation;
pub mod memory;
pub mod memory_db;
pub mod sql;
pub mod sqlite_source;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use analytics::{Insights, InsightsGenerator};
pub use catalog::{ColumnDescriptor, SchemaCatalog, SchemaView};
pub use config::Config;
pub use context_engine::{
    create_sqlite_orchestrator, Decomposer, QueryOrchestrator, QueryOutcome, RequestOptions, SubQuestionOutcome,
};
pub use error::{FailureKind, QueryFailure};
pub use execution::{ExecutionEngine, QueryResult, Row};
pub use generation::{Completion, GenerationAdapter, TokenUsage};
pub use memory::{ConversationTurn, HistoryStore, InMemoryHistoryStore, Role, TurnMetadata};
pub use memory_db::{HistoryDatabase, SqliteHistoryStore};
pub use sql::{SqlValidator, ValidationResult};
pub use sqlite_source::SqliteDataSource;
