//! Merges per-part outcomes of a compound question into one response

use tracing::info;

use crate::context_engine::decomposer::DecompositionBranch;
use crate::context_engine::outcome::{QueryOutcome, SubQuestionOutcome, MULTI_QUERY_TYPE};
use crate::generation::TokenUsage;

pub struct ResultAggregator {
    max_reason_chars: usize,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(300)
    }
}

impl ResultAggregator {
    pub fn new(max_reason_chars: usize) -> Self {
        Self { max_reason_chars }
    }

    /// `**Part N:**` segments in order, failed parts with their error inline
    pub fn combined_answer(&self, parts: &[SubQuestionOutcome]) -> String {
        parts
            .iter()
            .enumerate()
            .map(|(i, part)| match (&part.failure, part.success) {
                (Some(failure), false) => format!(
                    "**Part {}:** {} (Error: {})",
                    i + 1,
                    part.answer,
                    failure.public_reason(self.max_reason_chars)
                ),
                _ => format!("**Part {}:** {}", i + 1, part.answer),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn aggregate(&self, parts: Vec<SubQuestionOutcome>, branch: DecompositionBranch) -> QueryOutcome {
        let answer = if parts.is_empty() {
            "No results generated.".to_string()
        } else {
            self.combined_answer(&parts)
        };

        let sql_queries: Vec<String> = parts
            .iter()
            .filter_map(|p| p.sql.clone())
            .filter(|s| !s.is_empty())
            .collect();
        let formatted_data_list: Vec<String> = parts
            .iter()
            .filter_map(|p| p.formatted_data.clone())
            .filter(|s| !s.is_empty())
            .collect();
        let row_count = parts.iter().map(|p| p.row_count).sum();
        let token_usage = parts
            .iter()
            .fold(None, |acc: Option<TokenUsage>, p| TokenUsage::merge(acc, p.token_usage));
        let warnings = parts.iter().flat_map(|p| p.warnings.iter().cloned()).collect();

        let primary = parts.iter().find(|p| p.success);
        let success = primary.is_some();
        let failure = if success {
            None
        } else {
            parts.iter().find_map(|p| p.failure.clone())
        };

        info!(
            "Aggregated {} parts: {} succeeded, {} rows total",
            parts.len(),
            parts.iter().filter(|p| p.success).count(),
            row_count
        );

        QueryOutcome {
            success,
            answer,
            sql: primary.and_then(|p| p.sql.clone()),
            sql_queries,
            data: primary.map(|p| p.rows.clone()).unwrap_or_default(),
            columns: primary.map(|p| p.columns.clone()).unwrap_or_default(),
            row_count,
            formatted_data: primary.and_then(|p| p.formatted_data.clone()),
            formatted_data_list,
            insights: primary.and_then(|p| p.insights.clone()),
            query_type: Some(MULTI_QUERY_TYPE.to_string()),
            empty_result: success && parts.iter().filter(|p| p.success).all(|p| p.empty_result),
            failure,
            warnings,
            token_usage,
            branch: Some(branch),
            cancelled: false,
            parts,
        }
    }
}
