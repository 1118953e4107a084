//! Markdown rendering of query results

use serde_json::Value;

use crate::execution::Row;
use crate::sql::FormatHint;
use crate::utils::TextUtils;

const NO_DATA: &str = "_No data to display_";

#[derive(Debug, Clone)]
pub struct ResultFormatter {
    max_rows: usize,
    max_col_width: usize,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(20, 50)
    }
}

impl ResultFormatter {
    pub fn new(max_rows: usize, max_col_width: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
            max_col_width: max_col_width.max(4),
        }
    }

    /// Layout chosen by the query's format hint
    pub fn format(&self, hint: FormatHint, columns: &[String], rows: &[Row]) -> String {
        match hint {
            FormatHint::Table => self.format_as_table(columns, rows),
            FormatHint::List => self.format_as_list(columns, rows),
            FormatHint::Summary => self.format_summary(columns, rows),
        }
    }

    pub fn format_as_table(&self, columns: &[String], rows: &[Row]) -> String {
        if rows.is_empty() {
            return NO_DATA.to_string();
        }
        let headers = headers(columns, rows);
        if headers.is_empty() {
            return "_No columns in data_".to_string();
        }

        let mut lines = Vec::with_capacity(rows.len().min(self.max_rows) + 2);
        lines.push(format!("| {} |", headers.join(" | ")));
        lines.push(format!("|{}|", vec!["---"; headers.len()].join("|")));
        for row in rows.iter().take(self.max_rows) {
            let cells: Vec<String> = headers
                .iter()
                .map(|h| self.format_value(row.get(h.as_str()).unwrap_or(&Value::Null)))
                .collect();
            lines.push(format!("| {} |", cells.join(" | ")));
        }

        let mut table = lines.join("\n");
        if rows.len() > self.max_rows {
            table.push_str(&format!("\n\n_Showing {} of {} rows_", self.max_rows, rows.len()));
        }
        table
    }

    /// Bullets of the first column, with the first numeric column (or the
    /// second column) in parentheses.
    pub fn format_as_list(&self, columns: &[String], rows: &[Row]) -> String {
        if rows.is_empty() {
            return NO_DATA.to_string();
        }
        let headers = headers(columns, rows);
        let Some(primary) = headers.first() else {
            return NO_DATA.to_string();
        };
        let secondary = headers
            .iter()
            .skip(1)
            .find(|h| rows[0].get(h.as_str()).is_some_and(Value::is_number))
            .or_else(|| headers.get(1));

        let mut lines = Vec::new();
        for row in rows.iter().take(self.max_rows) {
            let first = self.format_value(row.get(primary.as_str()).unwrap_or(&Value::Null));
            match secondary.and_then(|key| row.get(key.as_str())) {
                Some(value) => lines.push(format!("• **{}** ({})", first, self.format_value(value))),
                None => lines.push(format!("• {}", first)),
            }
        }

        let mut list = lines.join("\n");
        if rows.len() > self.max_rows {
            list.push_str(&format!("\n\n_...and {} more_", rows.len() - self.max_rows));
        }
        list
    }

    pub fn format_summary(&self, columns: &[String], rows: &[Row]) -> String {
        match rows {
            [] => "_No data_".to_string(),
            [row] => headers(columns, rows)
                .iter()
                .map(|key| {
                    let value = row.get(key.as_str()).unwrap_or(&Value::Null);
                    format!("**{}**: {}", key, self.format_value(value))
                })
                .collect::<Vec<_>>()
                .join(" | "),
            _ => format!("_{} results_", rows.len()),
        }
    }

    fn format_value(&self, value: &Value) -> String {
        let text = match value {
            Value::Null => return "_null_".to_string(),
            Value::Number(n) => match n.as_f64() {
                Some(f) if !n.is_i64() && !n.is_u64() => {
                    if f.fract() == 0.0 && f.abs() < 1e15 {
                        format!("{}", f as i64)
                    } else {
                        format!("{:.2}", f)
                    }
                }
                _ => n.to_string(),
            },
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        TextUtils::truncate_with_ellipsis(&text, self.max_col_width).replace('|', "\\|")
    }
}

/// Declared column order, falling back to the first row's keys
fn headers(columns: &[String], rows: &[Row]) -> Vec<String> {
    if !columns.is_empty() {
        return columns.to_vec();
    }
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}
