//! Results of answering a sub-question and a whole question

use serde::Serialize;

use crate::analytics::Insights;
use crate::context_engine::decomposer::DecompositionBranch;
use crate::error::QueryFailure;
use crate::execution::Row;
use crate::generation::TokenUsage;
use crate::sql::QueryType;

/// Query type reported for an aggregated multi-part answer
pub const MULTI_QUERY_TYPE: &str = "multi_query";

/// Result of running one atomic question through the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct SubQuestionOutcome {
    pub question: String,
    pub success: bool,
    pub answer: String,
    /// Validated SQL, or the rejected text when validation failed
    pub sql: Option<String>,
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub formatted_data: Option<String>,
    /// Statistics over the returned rows
    pub insights: Option<Insights>,
    pub query_type: Option<QueryType>,
    /// Successful execution that returned no rows
    pub empty_result: bool,
    pub failure: Option<QueryFailure>,
    pub warnings: Vec<String>,
    pub token_usage: Option<TokenUsage>,
}

impl SubQuestionOutcome {
    pub fn failed(question: &str, answer: String, failure: QueryFailure) -> Self {
        Self {
            question: question.to_string(),
            success: false,
            answer,
            sql: None,
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            formatted_data: None,
            insights: None,
            query_type: None,
            empty_result: false,
            failure: Some(failure),
            warnings: Vec::new(),
            token_usage: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.token_usage = usage;
        self
    }

    pub fn with_query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = Some(query_type);
        self
    }
}

/// Response for one call to `QueryOrchestrator::process`
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub answer: String,
    /// SQL of the first successful part
    pub sql: Option<String>,
    /// Every non-empty SQL in part order
    pub sql_queries: Vec<String>,
    pub data: Vec<Row>,
    pub columns: Vec<String>,
    /// Sum over all parts
    pub row_count: usize,
    pub formatted_data: Option<String>,
    pub formatted_data_list: Vec<String>,
    /// Statistics of the first successful part
    pub insights: Option<Insights>,
    pub query_type: Option<String>,
    pub empty_result: bool,
    pub failure: Option<QueryFailure>,
    pub warnings: Vec<String>,
    pub token_usage: Option<TokenUsage>,
    pub branch: Option<DecompositionBranch>,
    pub cancelled: bool,
    pub parts: Vec<SubQuestionOutcome>,
}

impl QueryOutcome {
    /// Single atomic question: the part's fields are passed through as-is
    pub fn from_single(part: SubQuestionOutcome, branch: DecompositionBranch) -> Self {
        Self {
            success: part.success,
            answer: part.answer.clone(),
            sql: part.sql.clone(),
            sql_queries: part.sql.iter().filter(|s| !s.is_empty()).cloned().collect(),
            data: part.rows.clone(),
            columns: part.columns.clone(),
            row_count: part.row_count,
            formatted_data: part.formatted_data.clone(),
            formatted_data_list: part.formatted_data.iter().cloned().collect(),
            insights: part.insights.clone(),
            query_type: part.query_type.map(|t| t.as_str().to_string()),
            empty_result: part.empty_result,
            failure: part.failure.clone(),
            warnings: part.warnings.clone(),
            token_usage: part.token_usage,
            branch: Some(branch),
            cancelled: false,
            parts: vec![part],
        }
    }

    /// Failure before decomposition, e.g. an unusable question
    pub fn rejected_input(answer: String, failure: QueryFailure) -> Self {
        Self {
            success: false,
            answer,
            sql: None,
            sql_queries: Vec::new(),
            data: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            formatted_data: None,
            formatted_data_list: Vec::new(),
            insights: None,
            query_type: None,
            empty_result: false,
            failure: Some(failure),
            warnings: Vec::new(),
            token_usage: None,
            branch: None,
            cancelled: false,
            parts: Vec::new(),
        }
    }
}
