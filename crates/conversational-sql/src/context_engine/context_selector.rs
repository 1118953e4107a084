//! Bounded, scored conversation context for SQL generation.
//!
//! Follow-up questions look further back and keep every in-window pair;
//! standalone questions only keep pairs that clear the relevance threshold.

use std::collections::BTreeSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::config::ContextSelectorConfig;
use crate::context_engine::relevance::{LexicalRelevanceScorer, PastExchange, RelevanceScorer};
use crate::memory::{ConversationTurn, Role};
use crate::sql::KeyComponents;
use crate::utils::TextUtils;

const FOLLOW_UP_HEADER: &str = "\n=== CONVERSATION CONTEXT (Follow-up detected) ===";
const HISTORY_HEADER: &str = "\n=== RELEVANT CONVERSATION HISTORY ===";
const FOOTER: &str = "\n=== END OF CONTEXT ===";
const REUSE_INSTRUCTION: &str = "\nIMPORTANT: If the current question refers to 'same', 'those', 'that', etc., \
reuse the relevant SQL filters, tables, and conditions from above.\n";

lazy_static! {
    static ref FOLLOW_UP_PATTERNS: Vec<Regex> = [
        // references to earlier results
        r"\b(same|similar|those|these|that|them|it)\b",
        r"\b(previous|last|earlier|above)\b",
        // modifications
        r"\b(also|too|additionally|furthermore)\b",
        r"\b(but|except|without|excluding)\b",
        r"\b(instead|rather than)\b",
        // comparison or extension
        r"\b(compared to|versus|vs|difference)\b",
        r"\b(add|include|show me more)\b",
        // refinement
        r"\b(only|just|specifically)\b",
        r"\b(change|update|modify)\b",
        r"\b(and|with)\b.*\?$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

/// Whether the question leans on earlier turns
pub fn is_follow_up(question: &str) -> bool {
    let lower = question.to_lowercase();
    match FOLLOW_UP_PATTERNS.iter().find(|re| re.is_match(&lower)) {
        Some(pattern) => {
            debug!("Follow-up detected via pattern: {}", pattern.as_str());
            true
        }
        None => false,
    }
}

/// A (user, assistant) pair chosen for the context block
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPair<'a> {
    /// Position of the pair inside the window, oldest first
    pub index: usize,
    pub question: &'a str,
    pub answer: &'a str,
    pub sql: Option<&'a str>,
    pub row_count: usize,
    pub relevance: f32,
}

#[derive(Clone)]
pub struct ContextSelector {
    config: ContextSelectorConfig,
    scorer: Arc<dyn RelevanceScorer>,
}

impl Default for ContextSelector {
    fn default() -> Self {
        Self::new(ContextSelectorConfig::default())
    }
}

impl ContextSelector {
    pub fn new(config: ContextSelectorConfig) -> Self {
        let scorer = Arc::new(LexicalRelevanceScorer::new(&config));
        Self { config, scorer }
    }

    pub fn with_scorer(config: ContextSelectorConfig, scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self { config, scorer }
    }

    pub fn config(&self) -> &ContextSelectorConfig {
        &self.config
    }

    /// Most turns any call may look at; callers fetch at least this many
    pub fn max_window(&self) -> usize {
        self.config.follow_up_window.max(self.config.standalone_window)
    }

    /// Chosen pairs in chronological order, at most top-K of them
    pub fn select<'a>(
        &self,
        history: &'a [ConversationTurn],
        question: &str,
        known_tables: &BTreeSet<String>,
    ) -> Vec<ScoredPair<'a>> {
        let follow_up = is_follow_up(question);
        let window_len = self.config.window(follow_up);
        let window = &history[history.len().saturating_sub(window_len)..];
        debug!("Considering {} turns for context (follow_up={})", window.len(), follow_up);

        let mut scored: Vec<ScoredPair<'a>> = window
            .chunks_exact(2)
            .enumerate()
            .filter_map(|(index, pair)| {
                let (user, assistant) = (&pair[0], &pair[1]);
                if user.role != Role::User || assistant.role != Role::Assistant {
                    return None;
                }
                let sql = assistant.sql();
                let relevance = self.scorer.score(
                    question,
                    PastExchange {
                        question: &user.content,
                        sql,
                    },
                    known_tables,
                );
                (follow_up || relevance > self.config.relevance_threshold).then(|| ScoredPair {
                    index,
                    question: &user.content,
                    answer: &assistant.content,
                    sql,
                    row_count: assistant.row_count(),
                    relevance,
                })
            })
            .collect();

        // highest score first, newer pair wins a tie
        scored.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| b.index.cmp(&a.index))
        });
        scored.truncate(self.config.top_k(follow_up));
        scored.sort_by_key(|pair| pair.index);
        scored
    }

    /// Rendered context block, or an empty string when no history applies
    pub fn build_context(
        &self,
        history: &[ConversationTurn],
        question: &str,
        known_tables: &BTreeSet<String>,
    ) -> String {
        if history.is_empty() {
            return String::new();
        }
        let selected = self.select(history, question, known_tables);
        if selected.is_empty() {
            return String::new();
        }

        let mut parts: Vec<String> = Vec::with_capacity(selected.len() * 4 + 3);
        parts.push(if is_follow_up(question) { FOLLOW_UP_HEADER } else { HISTORY_HEADER }.to_string());

        for (n, pair) in selected.iter().enumerate() {
            let idx = n + 1;
            parts.push(format!("\n[Q{}] {}", idx, pair.question));

            if let Some(sql) = pair.sql.filter(|s| !s.is_empty()) {
                parts.push(format!("   [SQL Used: {}]", sql));
                let components = KeyComponents::extract(sql, self.config.where_preview_chars);
                if !components.is_empty() {
                    parts.push(format!("   [Key Components: {}]", components.render()));
                }
                if pair.row_count > 0 {
                    parts.push(format!("   [Result: {} rows returned]", pair.row_count));
                }
            }

            parts.push(format!(
                "[A{}] {}",
                idx,
                TextUtils::preview(pair.answer, self.config.answer_preview_chars)
            ));
        }

        parts.push(FOOTER.to_string());
        parts.push(REUSE_INSTRUCTION.to_string());

        let average = selected.iter().map(|p| p.relevance).sum::<f32>() / selected.len() as f32;
        debug!("Built context with {} pairs (avg relevance {:.2})", selected.len(), average);
        parts.join("\n")
    }
}
