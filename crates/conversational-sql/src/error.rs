//! Typed pipeline failures and their user-facing messages

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::TextUtils;

/// Why a question (or one part of it) could not be answered.
///
/// Empty results are not a failure; see `SubQuestionOutcome::empty_result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The generator answered with an explicit refusal
    GenerationRefused,
    /// The generator call itself failed
    GenerationUnavailable,
    GenerationTimeout,
    /// The validator rejected the SQL or the question was unusable
    SafetyRejected,
    ExecutionFailed,
    ExecutionTimeout,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::GenerationRefused => "generation refused",
            FailureKind::GenerationUnavailable => "generation unavailable",
            FailureKind::GenerationTimeout => "generation timeout",
            FailureKind::SafetyRejected => "safety rejected",
            FailureKind::ExecutionFailed => "execution failed",
            FailureKind::ExecutionTimeout => "execution timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure produced at a stage boundary. `reason` holds the underlying cause.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {reason}")]
pub struct QueryFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl QueryFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::GenerationRefused, reason)
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::GenerationUnavailable, reason)
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::SafetyRejected, reason)
    }

    pub fn execution(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::ExecutionFailed, reason)
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "request cancelled before this part ran")
    }

    /// Short cause safe to show next to a failed part: the bounded reason for
    /// refusals and rejections, the kind name otherwise.
    pub fn public_reason(&self, max_reason_chars: usize) -> String {
        match self.kind {
            FailureKind::GenerationRefused | FailureKind::SafetyRejected => {
                TextUtils::truncate_with_ellipsis(&self.reason, max_reason_chars).into_owned()
            }
            kind => kind.as_str().to_string(),
        }
    }

    /// Text shown to the end user. Refusal and safety reasons are passed through
    /// (bounded to `max_reason_chars`) so the user can rephrase; store errors stay generic.
    pub fn user_message(&self, max_reason_chars: usize) -> String {
        let reason = TextUtils::truncate_with_ellipsis(&self.reason, max_reason_chars);
        match self.kind {
            FailureKind::GenerationRefused => {
                format!("I couldn't generate a query for that question. {}", reason)
            }
            FailureKind::SafetyRejected => {
                format!("I generated a query but it didn't pass safety checks. {}", reason)
            }
            FailureKind::GenerationUnavailable => {
                "I'm having trouble reaching the language model right now. Please try again.".to_string()
            }
            FailureKind::GenerationTimeout => {
                "Generating the query took too long (generation timeout). Please try again.".to_string()
            }
            FailureKind::ExecutionFailed => {
                "The query failed to execute. Please try rephrasing your question.".to_string()
            }
            FailureKind::ExecutionTimeout => {
                "The query took too long to run (execution timeout). Please try a narrower question.".to_string()
            }
            FailureKind::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}
