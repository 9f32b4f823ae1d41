//! Turns result rows into a short ranked list of findings: a deterministic
//! statistical pass first, then model-generated insights appended, capped at
//! [`MAX_INSIGHTS`]. The model pass degrades gracefully - any failure there
//! is logged and the deterministic insights still come back.

use crate::llm::LlmManager;
use crate::query::models::ResultSet;
use crate::query::parse;
use std::sync::Arc;
use tracing::warn;

pub const MAX_INSIGHTS: usize = 5;
/// Rows sampled into the insight prompt and the history snapshot.
pub const SAMPLE_ROWS: usize = 3;

pub struct InsightSynthesizer {
    oracle: Arc<LlmManager>,
}

impl InsightSynthesizer {
    pub fn new(oracle: Arc<LlmManager>) -> Self {
        Self { oracle }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        result: &ResultSet,
        interpretation: &str,
    ) -> Vec<String> {
        if result.is_empty() {
            return vec![
                "No data found for your query. Try adjusting the criteria or time range."
                    .to_string(),
            ];
        }

        let mut insights = deterministic_insights(result);

        match self.model_insights(question, result, interpretation).await {
            Ok(generated) => insights.extend(generated),
            Err(e) => warn!("Model-assisted insight pass failed, keeping deterministic insights: {}", e),
        }

        insights.truncate(MAX_INSIGHTS);
        insights
    }

    async fn model_insights(
        &self,
        question: &str,
        result: &ResultSet,
        interpretation: &str,
    ) -> Result<Vec<String>, crate::llm::LlmError> {
        let sample: Vec<_> = result
            .to_json_rows()
            .into_iter()
            .take(SAMPLE_ROWS)
            .collect();
        let sample_json =
            serde_json::to_string_pretty(&sample).unwrap_or_else(|_| "[]".to_string());

        let prompt = format!(
            r#"You are a retail business analyst. A user asked: "{question}"
Interpretation: {interpretation}
The query returned {count} row(s). Sample of the data:
{sample}

Provide 2-3 concise, business-relevant insights about this result.
Respond with a JSON array of strings and nothing else, for example:
["insight one", "insight two"]
"#,
            question = question,
            interpretation = interpretation,
            count = result.row_count(),
            sample = sample_json,
        );

        let completion = self.oracle.complete(&prompt).await?;

        let generated = match parse::extract_json::<Vec<String>>(&completion) {
            Ok(list) => list,
            // Not JSON - treat each non-empty line as one insight
            Err(_) => completion
                .lines()
                .map(|line| line.trim().trim_start_matches(['-', '*']).trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
        };

        Ok(generated)
    }
}

fn deterministic_insights(result: &ResultSet) -> Vec<String> {
    if result.row_count() == 1 {
        return single_row_insights(result);
    }

    let mut insights = vec![format!(
        "Found {} records matching your query",
        group_thousands(result.row_count() as i64)
    )];

    for (i, col) in result.columns.iter().enumerate() {
        if !col.name.to_lowercase().contains("sales") {
            continue;
        }
        let values = result.numeric_column(i);
        if values.is_empty() {
            continue;
        }
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        insights.push(format!(
            "{} ranges from {} to {} (average {})",
            col.name,
            format_currency(min),
            format_currency(max),
            format_currency(avg)
        ));
    }

    insights
}

/// A single row is an aggregate-style answer: one insight per numeric
/// column, formatted by column-name heuristics.
fn single_row_insights(result: &ResultSet) -> Vec<String> {
    let mut insights = Vec::new();
    let row = &result.rows[0];

    for (col, cell) in result.columns.iter().zip(row.iter()) {
        let Some(value) = cell.as_f64() else { continue };
        let lower = col.name.to_lowercase();

        let formatted = if lower.contains("sales") || lower.contains("revenue") {
            format_currency(value)
        } else if lower.contains("count") || lower.contains("total") {
            group_thousands(value.round() as i64)
        } else if lower.contains("avg") || lower.contains("average") {
            format!("{:.2}", value)
        } else {
            format!("{:.2}", value)
        };

        insights.push(format!("{}: {}", col.name, formatted));
    }

    insights
}

fn format_currency(value: f64) -> String {
    let negative = value < 0.0;
    let abs = value.abs();
    let whole = abs.trunc() as i64;
    let cents = ((abs - abs.trunc()) * 100.0).round() as i64;
    // Carry if cents rounded up to a dollar
    let (whole, cents) = if cents >= 100 { (whole + 1, 0) } else { (whole, cents) };
    let sign = if negative { "-" } else { "" };
    format!("{}${}.{:02}", sign, group_thousands(whole), cents)
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
