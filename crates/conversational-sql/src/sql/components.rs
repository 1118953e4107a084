//! Reusable pieces of a past query, surfaced so a follow-up can copy them

use lazy_static::lazy_static;
use regex::Regex;

use crate::utils::TextUtils;

lazy_static! {
    static ref FROM_TABLE: Regex = Regex::new(r"(?i)FROM\s+(\w+)").unwrap();
    static ref WHERE_CLAUSE: Regex = Regex::new(r"(?is)WHERE\s+(.+?)(?:GROUP BY|ORDER BY|LIMIT|$)").unwrap();
    static ref ORDER_BY_CLAUSE: Regex = Regex::new(r"(?i)ORDER BY\s+(.+?)(?:LIMIT|$)").unwrap();
    static ref LIMIT_VALUE: Regex = Regex::new(r"(?i)LIMIT\s+(\d+)").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyComponents {
    /// In order of first appearance, without duplicates
    pub tables: Vec<String>,
    pub filters: Option<String>,
    pub sorting: Option<String>,
    pub limit: Option<String>,
}

impl KeyComponents {
    /// `where_preview_chars` bounds the filter text
    pub fn extract(sql: &str, where_preview_chars: usize) -> Self {
        let mut tables: Vec<String> = Vec::new();
        for caps in FROM_TABLE.captures_iter(sql) {
            let table = &caps[1];
            if !tables.iter().any(|t| t == table) {
                tables.push(table.to_string());
            }
        }

        let filters = WHERE_CLAUSE
            .captures(sql)
            .map(|caps| TextUtils::take_chars(caps[1].trim(), where_preview_chars).to_string());
        let sorting = ORDER_BY_CLAUSE
            .captures(sql)
            .map(|caps| caps[1].trim().to_string());
        let limit = LIMIT_VALUE.captures(sql).map(|caps| caps[1].to_string());

        Self {
            tables,
            filters,
            sorting,
            limit,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.filters.is_none() && self.sorting.is_none() && self.limit.is_none()
    }

    /// `Tables: a, b | Filters: ... | Sorting: ... | Limit: n`, omitting absent parts
    pub fn render(&self) -> String {
        let mut details = Vec::with_capacity(4);
        if !self.tables.is_empty() {
            details.push(format!("Tables: {}", self.tables.join(", ")));
        }
        if let Some(filters) = &self.filters {
            details.push(format!("Filters: {}", filters));
        }
        if let Some(sorting) = &self.sorting {
            details.push(format!("Sorting: {}", sorting));
        }
        if let Some(limit) = &self.limit {
            details.push(format!("Limit: {}", limit));
        }
        details.join(" | ")
    }
}
