//! Question-to-SQL translation via the oracle, with a deterministic fallback
//! so a bad completion never fails the request.

use crate::llm::LlmManager;
use crate::query::models::{
    ConversationContext, TranslationResult, VisualizationType, NO_QUERY_SENTINEL,
};
use crate::query::parse;
use crate::query::schema::FACT_TABLE;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

pub struct QueryTranslator {
    oracle: Arc<LlmManager>,
}

/// Raw shape of the oracle's JSON answer. Everything is optional - missing
/// fields get defaults rather than failing the parse.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTranslation {
    #[serde(default)]
    interpretation: Option<String>,
    #[serde(default)]
    sql_query: Option<String>,
    #[serde(default)]
    visualization_type: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    expected_insights: Vec<String>,
}

impl QueryTranslator {
    pub fn new(oracle: Arc<LlmManager>) -> Self {
        Self { oracle }
    }

    /// Translates a business question into an interpretation plus candidate
    /// SQL. Never returns an error: oracle failures and unparsable
    /// completions produce the fixed fallback translation.
    pub async fn translate(
        &self,
        question: &str,
        context: Option<&ConversationContext>,
        schema_context: &str,
    ) -> TranslationResult {
        let prompt = build_prompt(question, context, schema_context);

        let completion = match self.oracle.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Translation oracle call failed, using fallback: {}", e);
                return fallback_translation(question);
            }
        };

        match parse::extract_json::<RawTranslation>(&completion) {
            Ok(raw) => finish_translation(question, raw),
            Err(e) => {
                warn!("Translation response was not valid JSON, using fallback: {}", e);
                fallback_translation(question)
            }
        }
    }
}

fn finish_translation(question: &str, raw: RawTranslation) -> TranslationResult {
    let sql_query = raw
        .sql_query
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case(NO_QUERY_SENTINEL));

    TranslationResult {
        interpretation: raw
            .interpretation
            .unwrap_or_else(|| format!("Analysis of: {}", question)),
        sql_query,
        visualization: raw
            .visualization_type
            .as_deref()
            .map(VisualizationType::parse)
            .unwrap_or(VisualizationType::Table),
        reasoning: raw.reasoning.unwrap_or_default(),
        expected_insights: raw.expected_insights,
        fallback: false,
    }
}

/// Fixed translation used when the oracle is unavailable or unparsable: echo
/// the question and count the fact table.
pub fn fallback_translation(question: &str) -> TranslationResult {
    TranslationResult {
        interpretation: format!("Analysis of: {}", question),
        sql_query: Some(format!(
            "SELECT COUNT(*) AS total_records FROM {}",
            FACT_TABLE
        )),
        visualization: VisualizationType::Table,
        reasoning: "Fallback interpretation used because the language model response could not be processed".to_string(),
        expected_insights: Vec::new(),
        fallback: true,
    }
}

fn build_prompt(
    question: &str,
    context: Option<&ConversationContext>,
    schema_context: &str,
) -> String {
    let context_section = context
        .and_then(|c| serde_json::to_string(c).ok())
        .map(|json| format!("\n### Conversation context:\n{}\n", json))
        .unwrap_or_default();

    format!(
        r#"You are a business intelligence assistant for a retail sales analytics database.
Convert the user's question into a DuckDB SQL query.

### Database schema:
{schema}

### Semantic notes:
- `sales` is the fact table; one row per sale line. `stores` is the store dimension, joined on `store_id`.
- `is_promotional` is TRUE when the sale happened under a promotion.
- `quantity` is always positive; `unit_price` and `total_amount` are in USD.
- `sale_date` is a DATE; use DuckDB date functions for time bucketing.
- Generate read-only SELECT statements only. Use table aliases when joining.
{context_section}
### Question:
`{question}`

### Output format:
Respond with a single JSON object and nothing else:
{{
  "interpretation": "what the user is asking for in business terms",
  "sqlQuery": "the SQL query, or the string NONE if no database query is needed",
  "visualizationType": "one of: table, line, bar, pie, scatter, metric",
  "reasoning": "why this query answers the question",
  "expectedInsights": ["short descriptions of what the results should reveal"]
}}
"#,
        schema = schema_context,
        question = question,
    )
}
