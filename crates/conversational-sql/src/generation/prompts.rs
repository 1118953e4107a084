//! Prompt templates for SQL generation and answer writing

use crate::analytics::Insights;
use crate::execution::Row;

const RULE: &str = "═══════════════════════════════════════════════════════════";

pub fn sql_system_prompt(schema: &str, max_limit: u64) -> String {
    format!(
        r#"You are an expert SQL assistant specializing in context-aware query generation.

DATABASE SCHEMA
{schema}

{RULE}
CORE RULES
{RULE}

## 1. CONTEXT AWARENESS

When you see [Key Components] from previous queries, follow these patterns:

"Same/Similar/Those": reuse the structure, replace the values.
[Q1] Top 10 formal shoes [Filters: sub_category='Formal Shoes' | Limit: 10]
[Current] "Same for running shoes": keep LIMIT 10, replace the filter.

"Only/Just/But": add a filter, keep the original LIMIT and ORDER BY so the
refinement filters the same result set instead of finding new rows.

"Also/Additionally": combine the new filter with the previous ones using AND.

## 2. SCHEMA USE

Copy table names exactly as listed. Check [examples: ...] for real column values.
When no column matches a property, fall back to LIKE on a descriptive text column.

## 3. SAFETY

Only SELECT statements. Never INSERT, UPDATE, DELETE, DROP, ALTER or CREATE.
Maximum LIMIT is {max_limit}. Always pair LIMIT with ORDER BY.

## 4. OUTPUT FORMAT

Return only the SQL in a markdown block:
```sql
SELECT column FROM table WHERE condition ORDER BY column LIMIT 10
```

If the question cannot be answered from this schema, reply with a single line:
ERROR: <reason>
"#
    )
}

pub fn sql_user_prompt(question: &str) -> String {
    format!("Convert this question to SQL:\n\nQuestion: {}\n\nSQL:", question)
}

/// User prompt that ties a non-empty history block to the new question
pub fn sql_user_prompt_with_context(context: &str, question: &str) -> String {
    format!(
        "{context}\n\n{RULE}\nCURRENT REQUEST (Follow-up)\n{RULE}\n\
         Based on the conversation history above, write a SQL query for the following question.\n\
         Reuse filters, tables, and logic from the history where appropriate (e.g. 'same', 'those', 'only').\n\n\
         Question: {question}\n\nSQL:"
    )
}

pub fn answer_system_prompt() -> &'static str {
    r#"You are a data analyst providing clear, concise answers.

Translate query results into a natural language answer that directly addresses the user's question.

1. Start with the core answer.
2. Use **bold** for emphasis instead of headers. Format numbers with thousands separators.
3. Use bullet points (•) for distinct items, or a markdown table for 3+ items with 2+ attributes.
4. Keep simple answers to 2-4 sentences.
5. Do not mention rows, records or SQL."#
}

/// Results are shown as pretty JSON, cut to `max_rows` with a note when
/// truncated. Statistics over the full result follow when available.
pub fn answer_user_prompt(
    question: &str,
    rows: &[Row],
    row_count: usize,
    max_rows: usize,
    insights: Option<&Insights>,
) -> String {
    let shown = &rows[..rows.len().min(max_rows)];
    let truncated_note = if rows.len() > max_rows {
        format!(" (showing first {} of {})", max_rows, row_count)
    } else {
        String::new()
    };
    let results = serde_json::to_string_pretty(shown).unwrap_or_else(|_| {
        shown
            .iter()
            .map(|row| format!("{:?}", row))
            .collect::<Vec<_>>()
            .join("\n")
    });

    let insights_section = insights.map(insights_section).unwrap_or_default();

    format!(
        "## User Question\n\"{question}\"\n\n## Query Results\n{row_count} rows returned{truncated_note}\n\n{results}\n{insights_section}\n\
         ## Your Task\nProvide a clear, natural language answer to the user's question using the results above.\n"
    )
}

fn insights_section(insights: &Insights) -> String {
    let mut section = String::new();
    if !insights.insights_text.is_empty() {
        section.push_str(&format!("\n## Key Insights\n{}\n", insights.insights_text));
    }
    let stats: Vec<String> = insights
        .numeric_stats()
        .map(|(column, s)| format!("  - {}: avg={}, min={}, max={}", column, s.avg, s.min, s.max))
        .collect();
    if !stats.is_empty() {
        section.push_str(&format!("\nStatistics:\n{}\n", stats.join("\n")));
    }
    section
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_prompt_embeds_schema_and_limit() {
        let prompt = sql_system_prompt("TABLE products: name (TEXT)", 100);
        assert!(prompt.contains("TABLE products: name (TEXT)"));
        assert!(prompt.contains("Maximum LIMIT is 100"));
        assert!(prompt.contains("ERROR: <reason>"));
    }

    #[test]
    fn test_context_prompt_keeps_both_parts() {
        let prompt = sql_user_prompt_with_context("=== CONTEXT ===", "same for running shoes");
        assert!(prompt.starts_with("=== CONTEXT ==="));
        assert!(prompt.contains("Question: same for running shoes"));
        assert!(prompt.ends_with("SQL:"));
    }

    #[test]
    fn test_answer_prompt_truncates_rows() {
        let rows: Vec<Row> = (0..20)
            .map(|i| {
                let mut row = Row::new();
                row.insert("n".into(), json!(i));
                row
            })
            .collect();
        let prompt = answer_user_prompt("how many?", &rows, 20, 15, None);
        assert!(prompt.contains("20 rows returned (showing first 15 of 20)"));
        assert!(prompt.contains("\"n\": 14"));
        assert!(!prompt.contains("\"n\": 15"));
    }

    #[test]
    fn test_answer_prompt_carries_statistics() {
        let rows: Vec<Row> = [4.5, 4.1, 4.7]
            .iter()
            .map(|r| json!({ "name": "shoe", "rating": r }).as_object().cloned().unwrap())
            .collect();
        let columns = vec!["name".to_string(), "rating".to_string()];
        let insights = crate::analytics::InsightsGenerator::default().generate(&columns, &rows);

        let prompt = answer_user_prompt("average rating?", &rows, 3, 15, Some(&insights));
        assert!(prompt.contains("## Key Insights\nFound 3 records. Rating: Avg 4.43, Range 4.1-4.7.\n"));
        assert!(prompt.contains("Statistics:\n  - rating: avg=4.43, min=4.1, max=4.7\n"));
        let task = prompt.find("## Your Task").unwrap();
        assert!(prompt.find("## Key Insights").unwrap() < task);
    }
}
