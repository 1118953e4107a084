//! Relevance of a past question/answer pair to the current question.
//!
//! Other implementations plug in through `ContextSelector::with_scorer`.

use std::collections::{BTreeSet, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::ContextSelectorConfig;

lazy_static! {
    static ref STOP_WORDS: HashSet<&'static str> = [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "from", "what", "how", "show", "me", "get", "find",
    ]
    .into_iter()
    .collect();
    static ref NUMBER: Regex = Regex::new(r"\b\d+\b").unwrap();
    static ref CONDITION: Regex = Regex::new(
        r"\b(greater than|less than|equal to|more than|at least|top|bottom|first|last)\b"
    )
    .unwrap();
    static ref SQL_TOKEN: Regex = Regex::new(r"\b(\w+)\b").unwrap();
}

/// A past turn pair, as seen by a scorer
#[derive(Debug, Clone, Copy)]
pub struct PastExchange<'a> {
    pub question: &'a str,
    pub sql: Option<&'a str>,
}

pub trait RelevanceScorer: Send + Sync {
    /// Score in `[0, 1]`; `known_tables` is the current allow-list
    fn score(&self, current_question: &str, past: PastExchange<'_>, known_tables: &BTreeSet<String>) -> f32;
}

/// Entities pulled out of a question with fixed patterns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionEntities {
    pub tables: Vec<String>,
    pub numbers: Vec<String>,
    pub conditions: Vec<String>,
}

impl QuestionEntities {
    pub fn extract(question: &str, known_tables: &BTreeSet<String>) -> Self {
        let lower = question.to_lowercase();
        let tables = known_tables
            .iter()
            .filter(|t| lower.contains(&t.to_lowercase()))
            .cloned()
            .collect();
        let numbers = NUMBER.find_iter(question).map(|m| m.as_str().to_string()).collect();
        let conditions = CONDITION
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .collect();
        Self {
            tables,
            numbers,
            conditions,
        }
    }
}

/// Shared tables, word overlap and SQL-token mentions, weighted and clamped
#[derive(Debug, Clone)]
pub struct LexicalRelevanceScorer {
    table_weight: f32,
    lexical_weight: f32,
    sql_mention_weight: f32,
    sql_token_min_len: usize,
}

impl Default for LexicalRelevanceScorer {
    fn default() -> Self {
        Self::new(&ContextSelectorConfig::default())
    }
}

impl LexicalRelevanceScorer {
    pub fn new(config: &ContextSelectorConfig) -> Self {
        Self {
            table_weight: config.table_weight,
            lexical_weight: config.lexical_weight,
            sql_mention_weight: config.sql_mention_weight,
            sql_token_min_len: config.sql_token_min_len,
        }
    }

    fn table_term(&self, current: &str, past: &str, known_tables: &BTreeSet<String>) -> f32 {
        let current_tables: HashSet<String> =
            QuestionEntities::extract(current, known_tables).tables.into_iter().collect();
        let past_tables: HashSet<String> =
            QuestionEntities::extract(past, known_tables).tables.into_iter().collect();
        let shared = current_tables.intersection(&past_tables).count();
        if shared == 0 {
            return 0.0;
        }
        let ratio = shared as f32 / current_tables.len().max(1) as f32;
        self.table_weight * ratio.min(1.0)
    }

    fn lexical_term(&self, current_lower: &str, past_lower: &str) -> f32 {
        let current = content_words(current_lower);
        let past = content_words(past_lower);
        if current.is_empty() || past.is_empty() {
            return 0.0;
        }
        let overlap = current.intersection(&past).count() as f32;
        let union = current.union(&past).count() as f32;
        self.lexical_weight * (overlap / union)
    }

    fn sql_mention_term(&self, current_lower: &str, past_sql: Option<&str>) -> f32 {
        let Some(sql) = past_sql else {
            return 0.0;
        };
        let sql_lower = sql.to_lowercase();
        let mentioned = SQL_TOKEN
            .find_iter(&sql_lower)
            .map(|m| m.as_str())
            .filter(|token| token.chars().count() >= self.sql_token_min_len)
            .any(|token| current_lower.contains(token));
        if mentioned {
            self.sql_mention_weight
        } else {
            0.0
        }
    }
}

impl RelevanceScorer for LexicalRelevanceScorer {
    fn score(&self, current_question: &str, past: PastExchange<'_>, known_tables: &BTreeSet<String>) -> f32 {
        let current_lower = current_question.to_lowercase();
        let past_lower = past.question.to_lowercase();

        let score = self.table_term(current_question, past.question, known_tables)
            + self.lexical_term(&current_lower, &past_lower)
            + self.sql_mention_term(&current_lower, past.sql);
        score.clamp(0.0, 1.0)
    }
}

fn content_words(lower: &str) -> HashSet<&str> {
    lower
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn past<'a>(question: &'a str, sql: Option<&'a str>) -> PastExchange<'a> {
        PastExchange { question, sql }
    }

    #[test]
    fn test_entities() {
        let entities = QuestionEntities::extract("Top 5 PRODUCTS with rating greater than 4", &tables(&["products", "orders"]));
        assert_eq!(entities.tables, vec!["products"]);
        assert_eq!(entities.numbers, vec!["5", "4"]);
        assert_eq!(entities.conditions, vec!["top", "greater than"]);
    }

    #[test]
    fn test_unrelated_pair_scores_zero() {
        let scorer = LexicalRelevanceScorer::default();
        let score = scorer.score("weather tomorrow", past("revenue by region", None), &tables(&["sales"]));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_shared_table_term() {
        let scorer = LexicalRelevanceScorer::default();
        let known = tables(&["products", "orders"]);
        // only the table term fires: no shared content words, no SQL
        let score = scorer.score("products cheap", past("products expensive", None), &known);
        // words: {products, cheap} vs {products, expensive} -> jaccard 1/3
        let expected = 0.4 + 0.3 * (1.0 / 3.0);
        assert!((score - expected).abs() < 1e-5, "score {}", score);
    }

    #[test]
    fn test_sql_mention_term() {
        let scorer = LexicalRelevanceScorer::default();
        let score = scorer.score(
            "and by rating?",
            past("best sellers", Some("SELECT name FROM items ORDER BY rating DESC")),
            &BTreeSet::new(),
        );
        assert!((score - 0.3).abs() < 1e-5, "score {}", score);
    }

    #[test]
    fn test_short_sql_tokens_ignored() {
        let scorer = LexicalRelevanceScorer::default();
        let score = scorer.score("id of x", past("zzz", Some("SELECT id FROM x")), &BTreeSet::new());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_stop_words_do_not_count() {
        let scorer = LexicalRelevanceScorer::default();
        let score = scorer.score("show me the", past("show me the", None), &BTreeSet::new());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_score_is_clamped() {
        let scorer = LexicalRelevanceScorer::default();
        let known = tables(&["products"]);
        let q = "products rating formal";
        let score = scorer.score(q, past(q, Some("SELECT rating FROM products")), &known);
        assert!(score <= 1.0);
        assert!((score - 1.0).abs() < 1e-5);
    }
}
