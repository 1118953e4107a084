//! Per-question state machine:
//! Decomposed -> ContextBuilt -> Generated -> Validated -> Executed -> Analyzed -> Answered -> Stored.
//!
//! Every collaborator call is bounded by a timeout and by the request's
//! cancellation token, and every collaborator failure becomes a typed
//! `QueryFailure` before it leaves the stage that saw it.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::analytics::{Insights, InsightsGenerator, ResultFormatter};
use crate::catalog::{SchemaCatalog, SchemaHandle, SchemaView};
use crate::config::{Config, OrchestratorConfig};
use crate::context_engine::aggregator::ResultAggregator;
use crate::context_engine::context_selector::ContextSelector;
use crate::context_engine::decomposer::Decomposer;
use crate::context_engine::outcome::{QueryOutcome, SubQuestionOutcome};
use crate::context_engine::relevance::RelevanceScorer;
use crate::error::{FailureKind, QueryFailure};
use crate::execution::{ExecutionEngine, QueryResult};
use crate::generation::{prompts, Completion, GenerationAdapter, GenerationOutcome, TokenUsage};
use crate::memory::{ConversationTurn, HistoryStore, SessionLocks, TurnMetadata};
use crate::sql::{QueryClassifier, SqlValidator};
use crate::utils::{sanitize_question, TextUtils};

const EMPTY_RESULT_ANSWER: &str = "No data found matching your query.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Decomposed,
    ContextBuilt,
    Generated,
    Validated,
    Executed,
    Analyzed,
    Answered,
    Stored,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Decomposed => "decomposed",
            Stage::ContextBuilt => "context_built",
            Stage::Generated => "generated",
            Stage::Validated => "validated",
            Stage::Executed => "executed",
            Stage::Analyzed => "analyzed",
            Stage::Answered => "answered",
            Stage::Stored => "stored",
        }
    }
}

/// Per-call overrides. Defaults come from `OrchestratorConfig`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub cancellation: CancellationToken,
    pub generation_timeout: Option<Duration>,
    pub execution_timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Default::default()
        }
    }
}

enum Guarded<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

async fn guarded<F: Future>(fut: F, timeout: Duration, cancel: &CancellationToken) -> Guarded<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Guarded::Cancelled,
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(value) => Guarded::Done(value),
            Err(_) => Guarded::TimedOut,
        },
    }
}

/// Immutable inputs shared by every part of one request
struct RequestSnapshot<'a> {
    allowed_tables: BTreeSet<String>,
    schema_prompt: String,
    history: &'a [ConversationTurn],
    generation_timeout: Duration,
    execution_timeout: Duration,
    cancel: &'a CancellationToken,
}

pub struct QueryOrchestrator {
    config: OrchestratorConfig,
    decomposer: Decomposer,
    selector: ContextSelector,
    validator: SqlValidator,
    formatter: ResultFormatter,
    insights: InsightsGenerator,
    aggregator: ResultAggregator,
    schema: SchemaHandle,
    generator: Arc<dyn GenerationAdapter>,
    answer_generator: Arc<dyn GenerationAdapter>,
    engine: Arc<dyn ExecutionEngine>,
    history: Arc<dyn HistoryStore>,
    session_locks: SessionLocks,
}

impl QueryOrchestrator {
    pub fn new(
        config: Config,
        schema: SchemaView,
        generator: Arc<dyn GenerationAdapter>,
        engine: Arc<dyn ExecutionEngine>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        info!(
            "Query orchestrator initialized with {} tables (limit default {}, max {})",
            schema.len(),
            config.validator.default_limit,
            config.validator.max_limit
        );
        Self {
            decomposer: Decomposer::new(config.decomposer.clone()),
            selector: ContextSelector::new(config.context.clone()),
            validator: SqlValidator::new(config.validator),
            formatter: ResultFormatter::default(),
            insights: InsightsGenerator::default(),
            aggregator: ResultAggregator::new(config.orchestrator.max_reason_chars),
            config: config.orchestrator,
            schema: SchemaHandle::new(schema),
            answer_generator: Arc::clone(&generator),
            generator,
            engine,
            history,
            session_locks: SessionLocks::new(),
        }
    }

    /// Use a different model (or adapter) for writing answers than for SQL
    pub fn with_answer_generator(mut self, answer_generator: Arc<dyn GenerationAdapter>) -> Self {
        self.answer_generator = answer_generator;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.selector = ContextSelector::with_scorer(self.selector.config().clone(), scorer);
        self
    }

    pub fn schema(&self) -> Arc<SchemaView> {
        self.schema.snapshot()
    }

    /// Re-introspect the catalog and swap the snapshot in. Requests already
    /// running keep the snapshot they started with.
    pub async fn reload_schema(&self, catalog: &dyn SchemaCatalog, timeout: Duration) -> anyhow::Result<usize> {
        let view = SchemaView::introspect(catalog, timeout).await?;
        let tables = view.len();
        self.schema.replace(view);
        Ok(tables)
    }

    pub fn decompose(&self, question: &str) -> Vec<String> {
        self.decomposer.decompose(question)
    }

    /// Context block for `question` against the current schema's tables
    pub fn build_context(&self, history: &[ConversationTurn], question: &str) -> String {
        self.selector
            .build_context(history, question, &self.schema.snapshot().allowed_tables())
    }

    pub fn clear_session(&self, session_id: &str) -> anyhow::Result<()> {
        self.history.clear(session_id)?;
        self.session_locks.release_idle(session_id);
        Ok(())
    }

    pub async fn process(&self, question: &str, session_id: &str) -> QueryOutcome {
        self.process_with(question, session_id, RequestOptions::default()).await
    }

    pub async fn process_with(&self, question: &str, session_id: &str, options: RequestOptions) -> QueryOutcome {
        let span = info_span!("process_question", session_id = %session_id, parts = tracing::field::Empty);
        let outcome = self.process_inner(question, session_id, options).instrument(span).await;
        self.session_locks.release_idle(session_id);
        outcome
    }

    async fn process_inner(&self, raw_question: &str, session_id: &str, options: RequestOptions) -> QueryOutcome {
        let Some(question) = sanitize_question(raw_question, self.config.max_question_chars) else {
            let failure = QueryFailure::rejected("Question cannot be empty");
            warn!("Rejected empty question");
            return QueryOutcome::rejected_input(failure.user_message(self.config.max_reason_chars), failure);
        };
        info!("Processing question: {}", TextUtils::preview(&question, 50));

        let _session_guard = self.session_locks.acquire(session_id).await;

        let schema = self.schema.snapshot();
        let history = self.load_history(session_id).await;
        let snapshot = RequestSnapshot {
            allowed_tables: schema.allowed_tables(),
            schema_prompt: schema.render_for_prompt(),
            history: &history,
            generation_timeout: options.generation_timeout.unwrap_or(self.config.generation_timeout),
            execution_timeout: options.execution_timeout.unwrap_or(self.config.execution_timeout),
            cancel: &options.cancellation,
        };

        let decomposition = self.decomposer.decompose_traced(&question);
        tracing::Span::current().record("parts", decomposition.parts.len());
        debug!(
            stage = Stage::Decomposed.as_str(),
            branch = ?decomposition.branch,
            "{} sub-question(s)",
            decomposition.parts.len()
        );

        if !decomposition.is_compound() {
            let part = self.run_part(&decomposition.parts[0], &snapshot).await;
            let cancelled = is_cancelled(&part);
            let mut outcome = QueryOutcome::from_single(part, decomposition.branch);
            outcome.cancelled = cancelled;
            if !cancelled {
                self.store_single(session_id, &question, &outcome).await;
            }
            return outcome;
        }

        info!("Executing {} sub-questions", decomposition.parts.len());
        let mut parts = Vec::with_capacity(decomposition.parts.len());
        for sub_question in &decomposition.parts {
            if snapshot.cancel.is_cancelled() {
                parts.push(self.cancelled_part(sub_question));
                continue;
            }
            parts.push(self.run_part(sub_question, &snapshot).await);
        }

        let cancelled = parts.iter().any(is_cancelled);
        let mut outcome = self.aggregator.aggregate(parts, decomposition.branch);
        outcome.cancelled = cancelled;
        if cancelled {
            info!("Request cancelled; returning partial aggregation without storing it");
        } else {
            self.store_combined(session_id, &question, &outcome).await;
        }
        outcome
    }

    async fn run_part(&self, question: &str, snapshot: &RequestSnapshot<'_>) -> SubQuestionOutcome {
        // ContextBuilt
        let context = self
            .selector
            .build_context(snapshot.history, question, &snapshot.allowed_tables);
        debug!(
            stage = Stage::ContextBuilt.as_str(),
            with_context = !context.is_empty(),
            "Built generation context"
        );

        // Generated
        let system_prompt = prompts::sql_system_prompt(&snapshot.schema_prompt, self.validator.policy().max_limit);
        let user_prompt = if context.is_empty() {
            prompts::sql_user_prompt(question)
        } else {
            prompts::sql_user_prompt_with_context(&context, question)
        };
        let (generated, sql_usage) = match guarded(
            self.generator.complete(&system_prompt, &user_prompt),
            snapshot.generation_timeout,
            snapshot.cancel,
        )
        .await
        {
            Guarded::Done(result) => GenerationOutcome::from_result(result),
            Guarded::TimedOut => {
                let failure = QueryFailure::new(
                    FailureKind::GenerationTimeout,
                    format!("no response within {:?}", snapshot.generation_timeout),
                );
                warn!("SQL generation timed out after {:?}", snapshot.generation_timeout);
                return self.fail(question, failure);
            }
            Guarded::Cancelled => return self.cancelled_part(question),
        };

        let candidate = match generated {
            GenerationOutcome::Sql(sql) => sql,
            GenerationOutcome::Refused(reason) => {
                info!("Generator refused: {}", TextUtils::preview(&reason, 100));
                return self.fail(question, QueryFailure::refused(reason)).with_usage(sql_usage);
            }
            GenerationOutcome::Unavailable(cause) => {
                error!("Generation adapter failed: {}", cause);
                return self.fail(question, QueryFailure::unavailable(cause));
            }
        };
        debug!(stage = Stage::Generated.as_str(), "Generated SQL: {}", TextUtils::preview(&candidate, 100));

        // Validated
        let validation = self.validator.validate(&candidate, &snapshot.allowed_tables);
        if !validation.is_valid {
            let reason = validation.error.unwrap_or_else(|| "SQL failed validation".to_string());
            warn!("SQL validation failed: {}", reason);
            return self
                .fail(question, QueryFailure::rejected(reason))
                .with_sql(validation.sql)
                .with_usage(sql_usage);
        }
        let sql = validation.sql;
        let query_type = QueryClassifier::classify(&sql);
        debug!(stage = Stage::Validated.as_str(), query_type = query_type.as_str(), "SQL passed validation");

        // Executed
        let result = match guarded(self.engine.execute(&sql), snapshot.execution_timeout, snapshot.cancel).await {
            Guarded::Done(Ok(result)) if result.success => result,
            Guarded::Done(Ok(result)) => {
                let cause = result.error.unwrap_or_else(|| "unknown store error".to_string());
                error!("Query execution failed: {}", cause);
                return self.execution_failed(question, &sql, query_type, cause, sql_usage);
            }
            Guarded::Done(Err(e)) => {
                error!("Execution engine error: {:#}", e);
                return self.execution_failed(question, &sql, query_type, format!("{:#}", e), sql_usage);
            }
            Guarded::TimedOut => {
                warn!("Query execution timed out after {:?}", snapshot.execution_timeout);
                let failure = QueryFailure::new(
                    FailureKind::ExecutionTimeout,
                    format!("no result within {:?}", snapshot.execution_timeout),
                );
                return self
                    .fail(question, failure)
                    .with_sql(sql)
                    .with_query_type(query_type)
                    .with_usage(sql_usage);
            }
            Guarded::Cancelled => {
                return self
                    .cancelled_part(question)
                    .with_sql(sql)
                    .with_usage(sql_usage);
            }
        };
        debug!(stage = Stage::Executed.as_str(), rows = result.row_count, "Query executed");

        // Analyzed
        let formatted_data = if result.rows.is_empty() {
            None
        } else {
            Some(
                self.formatter
                    .format(query_type.format_hint(), &result.columns, &result.rows),
            )
        };
        let insights = self.insights.generate(&result.columns, &result.rows);
        debug!(
            stage = Stage::Analyzed.as_str(),
            "Formatted results as {:?}; {}",
            query_type.format_hint(),
            insights.insights_text
        );

        // Answered
        let empty_result = result.rows.is_empty();
        let (answer, answer_usage) = if empty_result {
            (EMPTY_RESULT_ANSWER.to_string(), None)
        } else {
            self.write_answer(question, &result, &insights, formatted_data.as_deref(), snapshot)
                .await
        };
        debug!(stage = Stage::Answered.as_str(), empty_result, "Answer ready");

        SubQuestionOutcome {
            question: question.to_string(),
            success: true,
            answer,
            sql: Some(sql),
            row_count: result.row_count,
            rows: result.rows,
            columns: result.columns,
            formatted_data,
            insights: Some(insights),
            query_type: Some(query_type),
            empty_result,
            failure: None,
            warnings: validation.warnings,
            token_usage: TokenUsage::merge(sql_usage, answer_usage),
        }
    }

    /// Natural-language answer; falls back to a row count plus the formatted
    /// preview so this stage never fails the question.
    async fn write_answer(
        &self,
        question: &str,
        result: &QueryResult,
        insights: &Insights,
        formatted: Option<&str>,
        snapshot: &RequestSnapshot<'_>,
    ) -> (String, Option<TokenUsage>) {
        let row_count = result.row_count;
        let user_prompt = prompts::answer_user_prompt(
            question,
            &result.rows,
            row_count,
            self.config.answer_preview_rows,
            Some(insights),
        );
        let attempt = guarded(
            self.answer_generator
                .complete(prompts::answer_system_prompt(), &user_prompt),
            snapshot.generation_timeout,
            snapshot.cancel,
        )
        .await;

        match attempt {
            Guarded::Done(Ok(Completion { text, usage })) if !text.trim().is_empty() => {
                (text.trim().to_string(), usage)
            }
            Guarded::Done(Ok(_)) => {
                warn!("Answer generation returned empty text; using fallback answer");
                (fallback_answer(row_count, formatted), None)
            }
            Guarded::Done(Err(e)) => {
                warn!("Answer generation failed, using fallback answer: {:#}", e);
                (fallback_answer(row_count, formatted), None)
            }
            Guarded::TimedOut => {
                warn!("Answer generation timed out; using fallback answer");
                (fallback_answer(row_count, formatted), None)
            }
            Guarded::Cancelled => (fallback_answer(row_count, formatted), None),
        }
    }

    fn fail(&self, question: &str, failure: QueryFailure) -> SubQuestionOutcome {
        let answer = failure.user_message(self.config.max_reason_chars);
        SubQuestionOutcome::failed(question, answer, failure)
    }

    fn execution_failed(
        &self,
        question: &str,
        sql: &str,
        query_type: crate::sql::QueryType,
        cause: String,
        usage: Option<TokenUsage>,
    ) -> SubQuestionOutcome {
        self.fail(question, QueryFailure::execution(cause))
            .with_sql(sql)
            .with_query_type(query_type)
            .with_usage(usage)
    }

    fn cancelled_part(&self, question: &str) -> SubQuestionOutcome {
        self.fail(question, QueryFailure::cancelled())
    }

    async fn load_history(&self, session_id: &str) -> Vec<ConversationTurn> {
        let store = Arc::clone(&self.history);
        let session = session_id.to_string();
        let n = self.selector.max_window();
        match tokio::task::spawn_blocking(move || store.get_recent(&session, n)).await {
            Ok(Ok(turns)) => turns,
            Ok(Err(e)) => {
                warn!("Failed to read history, continuing without context: {:#}", e);
                Vec::new()
            }
            Err(e) => {
                warn!("History read task failed, continuing without context: {}", e);
                Vec::new()
            }
        }
    }

    /// The question and its answer are written together or not at all
    async fn append_exchange(&self, session_id: &str, question: &str, assistant: ConversationTurn) {
        let store = Arc::clone(&self.history);
        let session = session_id.to_string();
        let user = ConversationTurn::user(question);
        let written =
            tokio::task::spawn_blocking(move || store.append_exchange(&session, user, assistant)).await;
        match written {
            Ok(Ok(())) => debug!(stage = Stage::Stored.as_str(), "History updated"),
            Ok(Err(e)) => warn!("Failed to store exchange in history: {:#}", e),
            Err(e) => warn!("History write task failed: {}", e),
        }
    }

    async fn store_single(&self, session_id: &str, question: &str, outcome: &QueryOutcome) {
        let assistant = match &outcome.failure {
            None => ConversationTurn::assistant(
                outcome.answer.clone(),
                TurnMetadata {
                    sql: outcome.sql.clone(),
                    row_count: outcome.row_count,
                    error: None,
                },
            ),
            Some(failure) => {
                let error = failure.to_string();
                ConversationTurn::assistant(
                    format!("I couldn't answer that question. Error: {}", error),
                    TurnMetadata {
                        sql: None,
                        row_count: 0,
                        error: Some(error),
                    },
                )
            }
        };
        self.append_exchange(session_id, question, assistant).await;
    }

    async fn store_combined(&self, session_id: &str, question: &str, outcome: &QueryOutcome) {
        let joined = outcome.sql_queries.join("; ");
        let assistant = ConversationTurn::assistant(
            outcome.answer.clone(),
            TurnMetadata {
                sql: (!joined.is_empty()).then_some(joined),
                row_count: outcome.row_count,
                error: None,
            },
        );
        self.append_exchange(session_id, question, assistant).await;
    }
}

fn is_cancelled(part: &SubQuestionOutcome) -> bool {
    part.failure
        .as_ref()
        .is_some_and(|f| f.kind == FailureKind::Cancelled)
}

fn fallback_answer(row_count: usize, formatted: Option<&str>) -> String {
    let noun = if row_count == 1 { "row" } else { "rows" };
    match formatted {
        Some(preview) if !preview.is_empty() => format!("Found {} {}.\n\n{}", row_count, noun, preview),
        _ => format!("Found {} {}.", row_count, noun),
    }
}
