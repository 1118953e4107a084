//! Query execution seam and its result type

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One result row, column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: f64,
}

impl QueryResult {
    pub fn ok(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            success: true,
            row_count: rows.len(),
            rows,
            columns,
            error: None,
            execution_time_ms: 0.0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_timing(mut self, execution_time_ms: f64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }
}

/// Runs validated, read-only SQL against the data store.
///
/// A store error may be reported either as `Err` or as a `QueryResult` with
/// `success == false`; callers treat both the same way.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, sql: &str) -> anyhow::Result<QueryResult>;
}
