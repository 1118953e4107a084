//! Safety gate for generator-produced SQL.
//!
//! Validation is a pure function of the SQL text, the table allow-list and the
//! LIMIT policy. Comments are removed first and string literals are masked
//! for every check. Checks short-circuit in order: empty input, unbalanced
//! quotes or comments, statement type, forbidden keywords, table allow-list,
//! then LIMIT normalization.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ValidatorPolicy;
use crate::sql::lexer::{mask_string_literals, paren_depth_at, strip_comments, table_references};
use crate::utils::TextUtils;

/// Checked in this order; the first hit is reported
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP",
    "DELETE",
    "UPDATE",
    "INSERT",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "GRANT",
    "REVOKE",
    "EXEC",
    "EXECUTE",
    "MERGE",
    "REPLACE",
    "INTO OUTFILE",
    "INTO DUMPFILE",
    "LOAD_FILE",
];

lazy_static! {
    static ref SELECT_START: Regex = Regex::new(r"^SELECT\b").unwrap();
    static ref FORBIDDEN_PATTERNS: Vec<(&'static str, Regex)> = FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| {
            let pattern = format!(r"\b{}\b", kw.replace(' ', r"\s+"));
            (*kw, Regex::new(&pattern).unwrap())
        })
        .collect();
    // `LIMIT n` or the `LIMIT offset, n` form
    static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?i)\bLIMIT\s+(\d+)(\s*,\s*(\d+))?").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Normalized SQL when valid; the trimmed input otherwise
    pub sql: String,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn rejected(sql: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            sql: sql.into(),
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlValidator {
    policy: ValidatorPolicy,
}

impl SqlValidator {
    pub fn new(policy: ValidatorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ValidatorPolicy {
        self.policy
    }

    /// An empty `allowed_tables` disables the table check.
    pub fn validate(&self, sql: &str, allowed_tables: &BTreeSet<String>) -> ValidationResult {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return ValidationResult::rejected(sql, "Empty SQL query");
        }

        let cleaned = match strip_comments(trimmed) {
            Ok(cleaned) => cleaned,
            Err(e) => {
                warn!("Rejected malformed SQL: {}", e.as_str());
                return ValidationResult::rejected(trimmed, e.as_str());
            }
        };
        let cleaned = cleaned.trim();
        let sql = cleaned.strip_suffix(';').map_or(cleaned, str::trim_end);
        if sql.is_empty() {
            return ValidationResult::rejected(sql, "Empty SQL query");
        }
        let masked = mask_string_literals(sql);

        let upper = masked.to_uppercase();
        if !SELECT_START.is_match(&upper) {
            warn!("Rejected non-SELECT statement: {}", TextUtils::preview(sql, 50));
            return ValidationResult::rejected(sql, "Only SELECT statements are allowed");
        }

        if let Some(keyword) = find_forbidden_keyword(&upper) {
            warn!("Forbidden keyword detected: {}", keyword);
            return ValidationResult::rejected(sql, format!("Forbidden SQL keyword detected: {}", keyword));
        }

        if !allowed_tables.is_empty() {
            let disallowed = not_allowed(table_references(&masked), allowed_tables);
            if !disallowed.is_empty() {
                let names = disallowed.into_iter().collect::<Vec<_>>().join(", ");
                warn!("Rejected query referencing tables outside the allow-list: {}", names);
                return ValidationResult::rejected(sql, format!("Table not allowed: {}", names));
            }
        }

        let (sql, warnings) = self.enforce_limit(sql, &masked);
        info!("SQL validation passed: {}", TextUtils::preview(&sql, 50));
        ValidationResult {
            is_valid: true,
            sql,
            error: None,
            warnings,
        }
    }

    /// Clamp every LIMIT above the maximum and append the default when the
    /// outermost query has none. `masked` is `sql` with literals blanked.
    fn enforce_limit(&self, sql: &str, masked: &str) -> (String, Vec<String>) {
        let max = self.policy.max_limit;
        let mut warnings = Vec::new();
        let mut rewritten = String::with_capacity(sql.len() + 16);
        let mut last = 0;
        let mut outer_limit = false;

        for caps in LIMIT_CLAUSE.captures_iter(masked) {
            let (Some(whole), Some(first)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if paren_depth_at(masked, whole.start()) == 0 {
                outer_limit = true;
            }
            let (offset, count) = match caps.get(3) {
                Some(count) => (Some(first.as_str()), count.as_str()),
                None => (None, first.as_str()),
            };
            // digits only, so the parse can fail only on overflow
            let value = count.parse::<u64>().unwrap_or(u64::MAX);
            if value <= max {
                continue;
            }
            warnings.push(format!("Reduced LIMIT from {} to {}", count, max));
            rewritten.push_str(&sql[last..whole.start()]);
            match offset {
                Some(offset) => rewritten.push_str(&format!("LIMIT {}, {}", offset, max)),
                None => rewritten.push_str(&format!("LIMIT {}", max)),
            }
            last = whole.end();
        }
        rewritten.push_str(&sql[last..]);

        if !outer_limit {
            warnings.push(format!("Added LIMIT {} for safety", self.policy.default_limit));
            rewritten.push_str(&format!(" LIMIT {}", self.policy.default_limit));
        }
        for w in &warnings {
            warn!("{}", w);
        }
        (rewritten, warnings)
    }
}

/// Validate with the default LIMIT policy
pub fn validate(sql: &str, allowed_tables: &BTreeSet<String>) -> ValidationResult {
    SqlValidator::default().validate(sql, allowed_tables)
}

fn find_forbidden_keyword(upper_sql: &str) -> Option<&'static str> {
    FORBIDDEN_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(upper_sql))
        .map(|(kw, _)| *kw)
}

fn not_allowed(referenced: BTreeSet<String>, allowed_tables: &BTreeSet<String>) -> BTreeSet<String> {
    let allowed: BTreeSet<String> = allowed_tables.iter().map(|t| t.to_lowercase()).collect();
    referenced.into_iter().filter(|name| !allowed.contains(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn allow(tables: &[&str]) -> BTreeSet<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_rejects_empty() {
        let result = validate("   ", &allow(&["products"]));
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("Empty SQL query"));
    }

    #[test]
    fn test_rejects_non_select() {
        let result = validate("DROP TABLE x", &allow(&["x"]));
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("Only SELECT statements are allowed"));
    }

    #[test]
    fn test_names_forbidden_keyword() {
        let result = validate("SELECT * FROM x; DROP TABLE x", &allow(&["x"]));
        assert_eq!(result.error.as_deref(), Some("Forbidden SQL keyword detected: DROP"));

        let result = validate("select * from x into   outfile '/tmp/a'", &allow(&["x"]));
        assert_eq!(result.error.as_deref(), Some("Forbidden SQL keyword detected: INTO OUTFILE"));
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let result = validate("SELECT updated_at, is_deleted FROM x", &allow(&["x"]));
        assert!(result.is_valid, "{:?}", result.error);
    }

    #[test]
    fn test_disallowed_tables_are_named() {
        let result = validate(
            "SELECT * FROM products p JOIN `secrets` s ON p.id = s.id JOIN \"Audit\" a ON a.id = p.id",
            &allow(&["Products"]),
        );
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("Table not allowed: audit, secrets"));
    }

    #[test]
    fn test_empty_allow_list_skips_table_check() {
        let result = validate("SELECT * FROM anything", &BTreeSet::new());
        assert!(result.is_valid);
    }

    #[test]
    fn test_appends_default_limit() {
        let result = validate("SELECT * FROM products;", &allow(&["products"]));
        assert!(result.is_valid);
        assert_eq!(result.sql, "SELECT * FROM products LIMIT 50");
        assert_eq!(result.warnings, vec!["Added LIMIT 50 for safety".to_string()]);
    }

    #[test]
    fn test_clamps_large_limit() {
        let result = validate("SELECT * FROM products ORDER BY rating DESC limit 500", &allow(&["products"]));
        assert!(result.is_valid);
        assert_eq!(result.sql, "SELECT * FROM products ORDER BY rating DESC LIMIT 100");
        assert!(!result.warnings.is_empty());

        let result = validate("SELECT * FROM products LIMIT 10, 1000", &allow(&["products"]));
        assert_eq!(result.sql, "SELECT * FROM products LIMIT 10, 100");
    }

    #[test]
    fn test_small_limit_untouched() {
        let result = validate("SELECT * FROM products LIMIT 10", &allow(&["products"]));
        assert_eq!(result.sql, "SELECT * FROM products LIMIT 10");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_column_named_limit_still_gets_limit() {
        let result = validate("SELECT credit_limit FROM accounts", &allow(&["accounts"]));
        assert!(result.sql.ends_with("LIMIT 50"));
    }

    #[test]
    fn test_custom_policy() {
        let validator = SqlValidator::new(ValidatorPolicy { max_limit: 20, default_limit: 5 });
        let result = validator.validate("SELECT * FROM t", &allow(&["t"]));
        assert!(result.sql.ends_with("LIMIT 5"));
        let result = validator.validate("SELECT * FROM t LIMIT 50", &allow(&["t"]));
        assert!(result.sql.ends_with("LIMIT 20"));
    }

    #[test]
    fn test_comma_join_tables_are_checked() {
        let result = validate("SELECT * FROM products, secrets", &allow(&["products"]));
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("Table not allowed: secrets"));

        let result = validate(
            "SELECT p.name FROM products AS p, main.orders o WHERE o.product_id = p.id",
            &allow(&["products", "orders"]),
        );
        assert!(result.is_valid, "{:?}", result.error);
    }

    #[test]
    fn test_trailing_comment_cannot_swallow_limit() {
        let result = validate("SELECT id FROM items ORDER BY id DESC -- newest first", &allow(&["items"]));
        assert!(result.is_valid);
        assert_eq!(result.sql, "SELECT id FROM items ORDER BY id DESC LIMIT 50");

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY);
             WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 200)
             INSERT INTO items SELECT x FROM n;",
        )
        .unwrap();
        let mut stmt = conn.prepare(&result.sql).unwrap();
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0)).unwrap().count();
        assert_eq!(rows, 50);
    }

    #[test]
    fn test_commented_limit_does_not_count() {
        let result = validate("SELECT * FROM products /* LIMIT 5 */ WHERE rating > 4", &allow(&["products"]));
        assert_eq!(result.sql, "SELECT * FROM products   WHERE rating > 4 LIMIT 50");

        let result = validate("SELECT * FROM products WHERE name = 'LIMIT 5'", &allow(&["products"]));
        assert_eq!(result.sql, "SELECT * FROM products WHERE name = 'LIMIT 5' LIMIT 50");
    }

    #[test]
    fn test_subquery_limit_still_gets_outer_limit() {
        let result = validate(
            "SELECT * FROM products WHERE id IN (SELECT product_id FROM orders LIMIT 5000)",
            &allow(&["products", "orders"]),
        );
        assert_eq!(
            result.sql,
            "SELECT * FROM products WHERE id IN (SELECT product_id FROM orders LIMIT 100) LIMIT 50"
        );
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_unbalanced_text_is_rejected() {
        let result = validate("SELECT * FROM products WHERE name = 'open", &allow(&["products"]));
        assert_eq!(result.error.as_deref(), Some("Unterminated quoted text in SQL"));

        let result = validate("SELECT * FROM products /* LIMIT 5", &allow(&["products"]));
        assert_eq!(result.error.as_deref(), Some("Unterminated comment in SQL"));

        let result = validate("-- only a comment", &allow(&["products"]));
        assert_eq!(result.error.as_deref(), Some("Empty SQL query"));
    }

    #[test]
    fn test_forbidden_word_inside_literal_is_allowed() {
        let result = validate("SELECT * FROM products WHERE note = 'please drop by'", &allow(&["products"]));
        assert!(result.is_valid, "{:?}", result.error);
    }

    proptest! {
        #[test]
        fn prop_validation_is_idempotent(
            cols in "[a-z_]{1,12}",
            filter in "[a-z0-9 =']{0,20}",
            limit in proptest::option::of(0u64..5000),
            semicolon in any::<bool>(),
        ) {
            let mut sql = format!("SELECT {} FROM products", cols);
            if !filter.trim().is_empty() {
                sql.push_str(&format!(" WHERE {}", filter));
            }
            if let Some(n) = limit {
                sql.push_str(&format!(" LIMIT {}", n));
            }
            if semicolon {
                sql.push(';');
            }

            let tables = allow(&["products"]);
            let first = validate(&sql, &tables);
            let second = validate(&first.sql, &tables);
            prop_assert_eq!(&second.sql, &first.sql);
            prop_assert_eq!(second.is_valid, first.is_valid);
        }

        #[test]
        fn prop_valid_sql_is_bounded_select(
            body in "[A-Za-z0-9_ ,*=<>']{0,40}",
            limit in 0u64..100_000,
        ) {
            let sql = format!("SELECT {} FROM products LIMIT {}", body, limit);
            let result = validate(&sql, &allow(&["products"]));
            if result.is_valid {
                prop_assert!(result.sql.to_uppercase().starts_with("SELECT"));
                for caps in LIMIT_CLAUSE.captures_iter(&mask_string_literals(&result.sql)) {
                    let n: u64 = caps.get(3).unwrap_or_else(|| caps.get(1).unwrap()).as_str().parse().unwrap();
                    prop_assert!(n <= ValidatorPolicy::default().max_limit);
                }
            }
        }

        #[test]
        fn prop_forbidden_keyword_always_rejected(idx in 0usize..FORBIDDEN_KEYWORDS.len()) {
            let keyword = FORBIDDEN_KEYWORDS[idx];
            let sql = format!("SELECT * FROM products WHERE x = 1 {} y", keyword.to_lowercase());
            let result = validate(&sql, &allow(&["products"]));
            prop_assert!(!result.is_valid);
            prop_assert!(result.error.unwrap().contains("Forbidden SQL keyword detected"));
        }

        #[test]
        fn prop_every_from_list_item_is_checked(
            first_alias in proptest::option::of("[a-z]{1,3}"),
            second_alias in proptest::option::of("[a-z]{1,3}"),
            use_as in any::<bool>(),
            quote in 0usize..3,
        ) {
            let alias = |a: &Option<String>| match a {
                Some(a) if use_as => format!(" AS x{}", a),
                Some(a) => format!(" x{}", a),
                None => String::new(),
            };
            let hidden = match quote {
                0 => "secrets".to_string(),
                1 => "\"Secrets\"".to_string(),
                _ => "[secrets]".to_string(),
            };
            let sql = format!(
                "SELECT * FROM products{}, {}{} WHERE 1 = 1",
                alias(&first_alias),
                hidden,
                alias(&second_alias)
            );
            let result = validate(&sql, &allow(&["products"]));
            prop_assert!(!result.is_valid);
            prop_assert_eq!(result.error.as_deref(), Some("Table not allowed: secrets"));
        }
    }
}
