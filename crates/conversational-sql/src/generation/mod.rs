//! Text-generation seam: adapter trait, completion types and output parsing

pub mod http_adapter;
pub mod prompts;

pub use http_adapter::HttpGenerationAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const REFUSAL_PREFIX: &str = "ERROR:";
const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Field-wise sum, saturating at `u32::MAX`
    pub fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(other.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }

    /// Sum of whatever usage was reported; `None` only when nothing was
    pub fn merge(a: Option<TokenUsage>, b: Option<TokenUsage>) -> Option<TokenUsage> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.add(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// A language model reached through a system + user prompt pair.
///
/// Retries, rate limiting and transport concerns belong to the implementation.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<Completion>;
}

/// What a SQL-generation call produced, once the raw text is interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Sql(String),
    Refused(String),
    Unavailable(String),
}

impl GenerationOutcome {
    /// Interpret a raw completion: take the first fenced block if any, then
    /// treat a leading `ERROR:` as an explicit refusal.
    pub fn from_text(raw: &str) -> Self {
        let cleaned = extract_code_block(raw);
        match cleaned.strip_prefix(REFUSAL_PREFIX) {
            Some(reason) => {
                let reason = reason.trim();
                if reason.is_empty() {
                    GenerationOutcome::Refused("The model declined to answer.".to_string())
                } else {
                    GenerationOutcome::Refused(reason.to_string())
                }
            }
            None => GenerationOutcome::Sql(cleaned.to_string()),
        }
    }

    pub fn from_result(result: anyhow::Result<Completion>) -> (Self, Option<TokenUsage>) {
        match result {
            Ok(completion) => (Self::from_text(&completion.text), completion.usage),
            Err(e) => (GenerationOutcome::Unavailable(format!("{:#}", e)), None),
        }
    }
}

/// Body of the first ``` block, without its language tag line. A missing
/// closing fence keeps the rest of the text (truncated responses).
pub fn extract_code_block(raw: &str) -> &str {
    let text = raw.trim();
    let Some(open) = text.find(FENCE) else {
        return text;
    };

    let after_fence = open + FENCE.len();
    let body_start = match text[after_fence..].find('\n') {
        Some(nl) => after_fence + nl + 1,
        None => after_fence,
    };
    let body = &text[body_start..];
    match body.find(FENCE) {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}
