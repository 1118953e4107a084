//! Context engine module - decomposition, context selection and the per-question state machine

pub mod aggregator;
pub mod context_selector;
pub mod decomposer;
pub mod orchestrator;
pub mod outcome;
pub mod relevance;

pub use aggregator::ResultAggregator;
pub use context_selector::{is_follow_up, ContextSelector, ScoredPair};
pub use decomposer::{Decomposer, Decomposition, DecompositionBranch};
pub use orchestrator::{QueryOrchestrator, RequestOptions};
pub use outcome::{QueryOutcome, SubQuestionOutcome};
pub use relevance::{LexicalRelevanceScorer, PastExchange, QuestionEntities, RelevanceScorer};

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::catalog::SchemaView;
use crate::config::Config;
use crate::generation::HttpGenerationAdapter;
use crate::memory_db::HistoryDatabase;
use crate::sqlite_source::SqliteDataSource;

/// Orchestrator over a SQLite data file, a SQLite history file and the
/// configured OpenAI-compatible backend
pub async fn create_sqlite_orchestrator(
    config: Config,
    data_path: &Path,
    history_path: &Path,
) -> anyhow::Result<QueryOrchestrator> {
    let source = Arc::new(SqliteDataSource::open(data_path)?);
    let schema = SchemaView::introspect(source.as_ref(), config.orchestrator.execution_timeout).await?;

    let history = HistoryDatabase::new(history_path)?.history_store(config.history.max_messages);
    if let Some(days) = config.history.retention_days {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let removed = history.cleanup_sessions_before(cutoff)?;
        info!("Expired {} history sessions idle for more than {} days", removed, days);
    }
    let stats = history.stats()?;
    info!(
        "History holds {} turns across {} sessions",
        stats.total_turns, stats.total_sessions
    );

    let sql_generator = Arc::new(HttpGenerationAdapter::for_sql(&config.generator));
    let answer_generator = Arc::new(HttpGenerationAdapter::for_answers(&config.generator));

    Ok(
        QueryOrchestrator::new(config, schema, sql_generator, source, Arc::new(history))
            .with_answer_generator(answer_generator),
    )
}
