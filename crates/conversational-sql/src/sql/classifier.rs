//! Intent classification of validated SQL, used to pick a result layout

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

const RANKING_MAX_LIMIT: u64 = 20;

lazy_static! {
    static ref AGGREGATION: Regex = Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX)\s*\(").unwrap();
    static ref RANKING: Regex = Regex::new(r"(?i)ORDER\s+BY\s+.+\s+(DESC|ASC)").unwrap();
    static ref DISTRIBUTION: Regex = Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap();
    static ref LIMIT: Regex = Regex::new(r"(?i)\bLIMIT\s+(\d+)").unwrap();
    static ref WHERE: Regex = Regex::new(r"(?i)\bWHERE\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Aggregation,
    Ranking,
    Comparison,
    Lookup,
    Distribution,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    Table,
    List,
    Summary,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Aggregation => "aggregation",
            QueryType::Ranking => "ranking",
            QueryType::Comparison => "comparison",
            QueryType::Lookup => "lookup",
            QueryType::Distribution => "distribution",
            QueryType::Unknown => "unknown",
        }
    }

    pub fn format_hint(&self) -> FormatHint {
        match self {
            QueryType::Aggregation => FormatHint::Summary,
            QueryType::Ranking => FormatHint::List,
            _ => FormatHint::Table,
        }
    }
}

pub struct QueryClassifier;

impl QueryClassifier {
    pub fn classify(sql: &str) -> QueryType {
        if sql.trim().is_empty() {
            return QueryType::Unknown;
        }

        let grouped = DISTRIBUTION.is_match(sql);
        if AGGREGATION.is_match(sql) && !grouped {
            return QueryType::Aggregation;
        }
        if grouped {
            return QueryType::Distribution;
        }
        if RANKING.is_match(sql) {
            let small_limit = LIMIT
                .captures(sql)
                .and_then(|caps| caps[1].parse::<u64>().ok())
                .is_some_and(|n| n <= RANKING_MAX_LIMIT);
            if small_limit {
                return QueryType::Ranking;
            }
        }
        if WHERE.is_match(sql) {
            return QueryType::Comparison;
        }
        QueryType::Lookup
    }
}
