use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel the oracle returns in `sqlQuery` when no database query is
/// needed to answer the question.
pub const NO_QUERY_SENTINEL: &str = "NONE";

// Incoming request, produced by the web layer

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub requestor: Option<String>,
    pub context: Option<ConversationContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub previous_queries: Vec<String>,
    pub preferences: Option<serde_json::Value>,
}

/// Chart hint attached to a translation. Closed set - anything the oracle
/// returns outside of it falls back to `Table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationType {
    Table,
    Line,
    Bar,
    Pie,
    Scatter,
    Metric,
    Error,
}

impl VisualizationType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "line" => Self::Line,
            "bar" => Self::Bar,
            "pie" => Self::Pie,
            "scatter" => Self::Scatter,
            "metric" => Self::Metric,
            _ => Self::Table,
        }
    }
}

/// Structured output of the translation oracle call.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationResult {
    pub interpretation: String,
    /// `None` means the oracle answered with the NONE sentinel - execution
    /// is skipped and an empty result set is returned downstream.
    pub sql_query: Option<String>,
    pub visualization: VisualizationType,
    pub reasoning: String,
    pub expected_insights: Vec<String>,
    /// Set when the oracle call failed or its response was unparsable and
    /// the fixed fallback translation was substituted.
    pub fallback: bool,
}

// Typed result rows

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Text,
    Number,
    Boolean,
    Date,
    Currency,
    Percentage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Int(v) => serde_json::Value::from(*v),
            CellValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub semantic_type: SemanticType,
}

/// A result set with column semantics inferred once per set rather than
/// re-derived per cell.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    pub fn new(names: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let first = rows
                    .iter()
                    .filter_map(|r| r.get(i))
                    .find(|v| !matches!(v, CellValue::Null));
                let semantic_type = SemanticType::infer(&name, first);
                ColumnInfo { name, semantic_type }
            })
            .collect();
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Numeric values of one column, nulls and non-numeric cells skipped.
    pub fn numeric_column(&self, index: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|row| row.get(index).and_then(CellValue::as_f64))
            .collect()
    }

    /// Rows as JSON objects for the outbound response body.
    pub fn to_json_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, cell)| (col.name.clone(), cell.to_json()))
                    .collect()
            })
            .collect()
    }
}

impl SemanticType {
    /// Infers a column's semantic type from its name and a sample value.
    pub fn infer(name: &str, sample: Option<&CellValue>) -> Self {
        let lower = name.to_lowercase();
        let numeric = matches!(sample, Some(CellValue::Int(_)) | Some(CellValue::Float(_)));

        if numeric
            && ["sales", "revenue", "price", "amount", "cost"]
                .iter()
                .any(|k| lower.contains(k))
        {
            return Self::Currency;
        }
        if numeric
            && ["percent", "pct", "rate", "ratio"]
                .iter()
                .any(|k| lower.contains(k))
        {
            return Self::Percentage;
        }
        match sample {
            Some(CellValue::Bool(_)) => Self::Boolean,
            Some(CellValue::Int(_)) | Some(CellValue::Float(_)) => Self::Number,
            Some(CellValue::Text(s)) => {
                if lower.contains("date") || lower.ends_with("_at") || looks_like_date(s) {
                    Self::Date
                } else {
                    Self::Text
                }
            }
            _ => Self::Text,
        }
    }
}

fn looks_like_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || DateTime::parse_from_rfc3339(s).is_ok()
}

// Outbound response, serialized by the web layer

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub success: bool,
    pub query: String,
    pub interpretation: String,
    pub sql_query: String,
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
    pub insights: Vec<String>,
    pub visualization_type: VisualizationType,
    /// Wall-clock processing time in milliseconds.
    pub execution_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One append-only record per processed request, written regardless of
/// outcome.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub requestor: Option<String>,
    pub question: String,
    pub interpretation: String,
    pub sql_executed: String,
    /// JSON snapshot of the structured oracle translation.
    pub oracle_response: String,
    /// JSON snapshot of the first few result rows.
    pub result_snapshot: String,
    pub success: bool,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}
