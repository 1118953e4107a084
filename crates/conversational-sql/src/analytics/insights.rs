//! Rule-based statistics over query results.
//!
//! Each column is classified as numeric or text. Numeric columns get summary
//! statistics and the row holding their maximum; text columns get a value
//! distribution. The one-line `insights_text` is what the answer prompt sees.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::execution::Row;

/// Share of non-null values that must be numbers for a numeric column
const NUMERIC_SHARE: f64 = 0.8;
/// Median and standard deviation need at least this many values
const MIN_VALUES_FOR_SPREAD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum: f64,
    pub count: usize,
    pub median: Option<f64>,
    /// Sample standard deviation
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub unique_count: usize,
    pub total_count: usize,
    /// Most frequent first; ties keep first-seen order
    pub top_values: Vec<ValueCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopValue {
    /// Largest value and the row it came from
    Numeric { value: Value, row: Row },
    /// First non-null value
    Text { value: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInsight {
    pub name: String,
    pub kind: ColumnKind,
    pub stats: Option<NumericStats>,
    pub distribution: Option<Distribution>,
    pub top_value: TopValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub row_count: usize,
    /// Columns with at least one non-null value, in result order
    pub columns: Vec<ColumnInsight>,
    pub insights_text: String,
}

impl Insights {
    /// Numeric columns with their statistics
    pub fn numeric_stats(&self) -> impl Iterator<Item = (&str, &NumericStats)> {
        self.columns
            .iter()
            .filter_map(|c| c.stats.as_ref().map(|s| (c.name.as_str(), s)))
    }
}

#[derive(Debug, Clone)]
pub struct InsightsGenerator {
    top_n: usize,
}

impl Default for InsightsGenerator {
    fn default() -> Self {
        Self::new(5)
    }
}

impl InsightsGenerator {
    pub fn new(top_n: usize) -> Self {
        Self { top_n: top_n.max(1) }
    }

    pub fn generate(&self, columns: &[String], rows: &[Row]) -> Insights {
        if rows.is_empty() {
            return Insights {
                row_count: 0,
                columns: Vec::new(),
                insights_text: "No data returned.".to_string(),
            };
        }

        let names: Vec<String> = if columns.is_empty() {
            rows[0].keys().cloned().collect()
        } else {
            columns.to_vec()
        };

        let analyzed: Vec<ColumnInsight> = names
            .iter()
            .filter_map(|name| self.analyze_column(name, rows))
            .collect();
        debug!("Generated insights for {} of {} columns", analyzed.len(), names.len());

        let insights_text = summary_text(rows.len(), &analyzed);
        Insights {
            row_count: rows.len(),
            columns: analyzed,
            insights_text,
        }
    }

    fn analyze_column(&self, name: &str, rows: &[Row]) -> Option<ColumnInsight> {
        let values: Vec<&Value> = rows
            .iter()
            .filter_map(|row| row.get(name))
            .filter(|v| !v.is_null())
            .collect();
        let first = *values.first()?;

        let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
        if numbers.len() as f64 > values.len() as f64 * NUMERIC_SHARE {
            let top_value = max_row(name, rows)
                .map(|row| TopValue::Numeric {
                    value: row.get(name).cloned().unwrap_or(Value::Null),
                    row: row.clone(),
                })
                .unwrap_or_else(|| TopValue::Text { value: first.clone() });
            Some(ColumnInsight {
                name: name.to_string(),
                kind: ColumnKind::Numeric,
                stats: numeric_stats(&numbers),
                distribution: None,
                top_value,
            })
        } else {
            Some(ColumnInsight {
                name: name.to_string(),
                kind: ColumnKind::Text,
                stats: None,
                distribution: Some(self.distribution(&values)),
                top_value: TopValue::Text { value: first.clone() },
            })
        }
    }

    fn distribution(&self, values: &[&Value]) -> Distribution {
        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for value in values {
            let key = display_value(value);
            let count = counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                order.push(key);
            }
            *count += 1;
        }

        let mut ranked: Vec<ValueCount> = order
            .into_iter()
            .map(|value| {
                let count = counts.get(&value).copied().unwrap_or(0);
                ValueCount { value, count }
            })
            .collect();
        // stable sort keeps first-seen order among ties
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(self.top_n);

        Distribution {
            unique_count: counts.len(),
            total_count: values.len(),
            top_values: ranked,
        }
    }
}

/// First row holding the column's largest number; non-numbers count as zero
fn max_row<'a>(name: &str, rows: &'a [Row]) -> Option<&'a Row> {
    let key = |row: &Row| row.get(name).and_then(Value::as_f64).unwrap_or(0.0);
    rows.iter().fold(None, |best: Option<&Row>, row| match best {
        Some(b) if key(row) <= key(b) => Some(b),
        _ => Some(row),
    })
}

fn numeric_stats(numbers: &[f64]) -> Option<NumericStats> {
    if numbers.is_empty() {
        return None;
    }
    let count = numbers.len();
    let sum: f64 = numbers.iter().sum();
    let avg = sum / count as f64;
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let (median, std_dev) = if count >= MIN_VALUES_FOR_SPREAD {
        let mut sorted = numbers.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        let variance = numbers.iter().map(|n| (n - avg).powi(2)).sum::<f64>() / (count - 1) as f64;
        (Some(round2(median)), Some(round2(variance.sqrt())))
    } else {
        (None, None)
    };

    Some(NumericStats {
        min,
        max,
        avg: round2(avg),
        sum: round2(sum),
        count,
        median,
        std_dev,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `unit_price` -> `Unit Price`
fn display_name(column: &str) -> String {
    column
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn summary_text(row_count: usize, columns: &[ColumnInsight]) -> String {
    let mut parts = vec![format!("Found {} records.", row_count)];
    for column in columns {
        if let Some(stats) = &column.stats {
            parts.push(format!(
                "{}: Avg {}, Range {}-{}.",
                display_name(&column.name),
                stats.avg,
                stats.min,
                stats.max
            ));
        }
    }
    parts.join(" ")
}
