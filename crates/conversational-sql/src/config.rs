//! Environment-driven configuration with typed defaults

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Full runtime configuration, built once and handed to the orchestrator by value.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub validator: ValidatorPolicy,
    pub decomposer: DecomposerConfig,
    pub context: ContextSelectorConfig,
    pub orchestrator: OrchestratorConfig,
    pub generator: GeneratorConfig,
    pub history: HistoryConfig,
}

/// LIMIT policy applied by the SQL validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorPolicy {
    pub max_limit: u64,
    pub default_limit: u64,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            max_limit: 100,
            default_limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecomposerConfig {
    /// Questions with fewer words are never split
    pub min_words: usize,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self { min_words: 4 }
    }
}

/// Window sizes, weights and thresholds used when selecting history for a question
#[derive(Debug, Clone)]
pub struct ContextSelectorConfig {
    pub follow_up_window: usize,
    pub standalone_window: usize,
    pub follow_up_top_k: usize,
    pub standalone_top_k: usize,
    pub relevance_threshold: f32,
    pub table_weight: f32,
    pub lexical_weight: f32,
    pub sql_mention_weight: f32,
    /// SQL tokens shorter than this are ignored when matching against the question
    pub sql_token_min_len: usize,
    pub where_preview_chars: usize,
    pub answer_preview_chars: usize,
}

impl Default for ContextSelectorConfig {
    fn default() -> Self {
        Self {
            follow_up_window: 10,
            standalone_window: 6,
            follow_up_top_k: 3,
            standalone_top_k: 2,
            relevance_threshold: 0.2,
            table_weight: 0.4,
            lexical_weight: 0.3,
            sql_mention_weight: 0.3,
            sql_token_min_len: 4,
            where_preview_chars: 100,
            answer_preview_chars: 200,
        }
    }
}

impl ContextSelectorConfig {
    pub fn window(&self, is_follow_up: bool) -> usize {
        if is_follow_up { self.follow_up_window } else { self.standalone_window }
    }

    pub fn top_k(&self, is_follow_up: bool) -> usize {
        if is_follow_up { self.follow_up_top_k } else { self.standalone_top_k }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub generation_timeout: Duration,
    pub execution_timeout: Duration,
    pub max_question_chars: usize,
    /// Refusal and rejection reasons shown to the user are cut to this length
    pub max_reason_chars: usize,
    pub answer_preview_rows: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(30),
            max_question_chars: 2000,
            max_reason_chars: 300,
            answer_preview_rows: 15,
        }
    }
}

/// Persistence settings for the SQLite history store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Turns kept per session
    pub max_messages: usize,
    /// Sessions idle for longer are dropped at startup; `None` keeps everything
    pub retention_days: Option<u32>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            retention_days: None,
        }
    }
}

#[derive(Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub sql_model: String,
    pub answer_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            api_key: None,
            sql_model: "llama-3.3-70b-versatile".to_string(),
            answer_model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.1,
            max_tokens: 2048,
        }
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("sql_model", &self.sql_model)
            .field("answer_model", &self.answer_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let validator = ValidatorPolicy {
            max_limit: env_or("SQL_MAX_LIMIT", 100)?,
            default_limit: env_or("SQL_DEFAULT_LIMIT", 50)?,
        };
        if validator.default_limit > validator.max_limit {
            return Err(anyhow::anyhow!(
                "SQL_DEFAULT_LIMIT ({}) must not exceed SQL_MAX_LIMIT ({})",
                validator.default_limit,
                validator.max_limit
            ));
        }

        let orchestrator = OrchestratorConfig {
            generation_timeout: Duration::from_secs(env_or("GENERATION_TIMEOUT_SECONDS", 60)?),
            execution_timeout: Duration::from_secs(env_or("EXECUTION_TIMEOUT_SECONDS", 30)?),
            max_question_chars: env_or("MAX_QUESTION_CHARS", 2000)?,
            ..Default::default()
        };

        let sql_model = env::var("LLM_MODEL").unwrap_or_else(|_| "llama-3.3-70b-versatile".into());
        let generator = GeneratorConfig {
            base_url: env::var("LLM_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8081".into()),
            api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            answer_model: env::var("LLM_ANSWER_MODEL").unwrap_or_else(|_| sql_model.clone()),
            sql_model,
            temperature: env_or("LLM_TEMPERATURE", 0.1)?,
            max_tokens: env_or("LLM_MAX_TOKENS", 2048)?,
        };

        Ok(Self {
            validator,
            decomposer: DecomposerConfig::default(),
            context: ContextSelectorConfig::default(),
            orchestrator,
            generator,
            history: HistoryConfig {
                max_messages: env_or("HISTORY_MAX_MESSAGES", 20)?,
                // 0 disables expiry
                retention_days: Some(env_or::<u32>("HISTORY_RETENTION_DAYS", 0)?).filter(|days| *days > 0),
            },
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- SQL Limit: default {}, max {}", self.validator.default_limit, self.validator.max_limit);
        info!("- Generation Timeout: {:?}", self.orchestrator.generation_timeout);
        info!("- Execution Timeout: {:?}", self.orchestrator.execution_timeout);
        info!("- Max Question Length: {}", self.orchestrator.max_question_chars);
        info!(
            "- Context Windows: {} standalone / {} follow-up, top-k {} / {}",
            self.context.standalone_window,
            self.context.follow_up_window,
            self.context.standalone_top_k,
            self.context.follow_up_top_k
        );
        info!("- LLM Backend: {}", self.generator.base_url);
        info!("- LLM Models: sql={}, answer={}", self.generator.sql_model, self.generator.answer_model);
        match self.history.retention_days {
            Some(days) => info!("- History: {} turns per session, expire after {} days", self.history.max_messages, days),
            None => info!("- History: {} turns per session, no expiry", self.history.max_messages),
        }
        info!("- LLM API Key: {}", if self.generator.api_key.is_some() { "set" } else { "not set" });
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}
