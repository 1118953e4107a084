//! Rule-based splitting of compound questions into atomic sub-questions

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DecomposerConfig;
use crate::utils::TextUtils;

/// Imperative openers of questions that are answered by a single lookup
const SIMPLE_INDICATORS: &[&str] = &["show me", "list", "get", "what are", "count", "how many", "find"];

lazy_static! {
    static ref SPLIT_PATTERN: Regex = Regex::new(r"(?i)\?|;| and then ").unwrap();
}

/// Which rule decided the decomposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionBranch {
    /// Fewer words than the configured minimum
    TooShort,
    /// Simple lookup opener without any multi-step delimiter
    SimpleLookup,
    Split,
    /// Delimiters present but fewer than two non-empty parts
    NoSplit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    /// Never empty
    pub parts: Vec<String>,
    pub branch: DecompositionBranch,
}

impl Decomposition {
    fn atomic(question: &str, branch: DecompositionBranch) -> Self {
        Self {
            parts: vec![question.to_string()],
            branch,
        }
    }

    pub fn is_compound(&self) -> bool {
        self.parts.len() > 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct Decomposer {
    config: DecomposerConfig,
}

impl Decomposer {
    pub fn new(config: DecomposerConfig) -> Self {
        Self { config }
    }

    /// Ordered sub-questions; `[question]` when no split applies
    pub fn decompose(&self, question: &str) -> Vec<String> {
        self.decompose_traced(question).parts
    }

    pub fn decompose_traced(&self, question: &str) -> Decomposition {
        if TextUtils::count_words(question) < self.config.min_words {
            debug!("Question too short to decompose");
            return Decomposition::atomic(question, DecompositionBranch::TooShort);
        }

        let lower = question.trim().to_lowercase();
        let is_simple = SIMPLE_INDICATORS.iter().any(|ind| lower.starts_with(ind));
        let has_chained_steps = lower.contains(" and ") && lower.contains(" then ");
        let has_delimiters = lower.contains('?') || lower.contains(';');
        if is_simple && !has_chained_steps && !has_delimiters {
            info!("Skipping decomposition for simple lookup");
            return Decomposition::atomic(question, DecompositionBranch::SimpleLookup);
        }

        let parts: Vec<String> = SPLIT_PATTERN
            .split(question)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        if parts.len() > 1 {
            info!("Rule-based decomposition found {} parts", parts.len());
            Decomposition {
                parts,
                branch: DecompositionBranch::Split,
            }
        } else {
            Decomposition::atomic(question, DecompositionBranch::NoSplit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decompose(q: &str) -> Decomposition {
        Decomposer::default().decompose_traced(q)
    }

    #[test]
    fn test_short_questions_are_atomic() {
        let d = decompose("top rated shoes?");
        assert_eq!(d.parts, vec!["top rated shoes?"]);
        assert_eq!(d.branch, DecompositionBranch::TooShort);
    }

    #[test]
    fn test_simple_lookup_skips_split() {
        let d = decompose("Show me Nike shoes");
        assert_eq!(d.parts, vec!["Show me Nike shoes"]);
        assert_eq!(d.branch, DecompositionBranch::SimpleLookup);
    }

    #[test]
    fn test_splits_on_question_marks_in_order() {
        let d = decompose("What are the cheapest shoes? Also count how many we have.");
        assert_eq!(d.parts, vec!["What are the cheapest shoes", "Also count how many we have."]);
        assert_eq!(d.branch, DecompositionBranch::Split);
    }

    #[test]
    fn test_splits_on_and_then_case_insensitive() {
        let d = decompose("Find the best brand AND THEN list its top products");
        assert_eq!(d.parts, vec!["Find the best brand", "list its top products"]);
    }

    #[test]
    fn test_single_fragment_falls_back() {
        let d = decompose("Which brand sells the most shoes?");
        assert_eq!(d.parts, vec!["Which brand sells the most shoes?"]);
        assert_eq!(d.branch, DecompositionBranch::NoSplit);
    }

    #[test]
    fn test_only_delimiters_keeps_original() {
        let d = decompose("?? ;; ? ; ;");
        assert_eq!(d.parts, vec!["?? ;; ? ; ;"]);
        assert!(!d.is_compound());
    }

    proptest! {
        #[test]
        fn prop_output_never_empty(question in "[a-zA-Z?; ]{0,60}") {
            let parts = Decomposer::default().decompose(&question);
            prop_assert!(!parts.is_empty());
            if parts.len() > 1 {
                prop_assert!(parts.iter().all(|p| !p.trim().is_empty()));
            }
        }
    }
}
