//! Query execution against the analytical store, with a single oracle-driven
//! repair attempt on failure. Worst case per request: two execution attempts
//! and one repair-prompt oracle call.

use crate::db::db_pool::DbPool;
use crate::llm::LlmManager;
use crate::query::models::{CellValue, ResultSet};
use crate::query::{parse, validate};
use duckdb::types::ValueRef;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct QueryExecutor {
    pool: DbPool,
    oracle: Arc<LlmManager>,
    timeout: Duration,
}

/// Terminal execution success: rows plus the SQL that actually ran, which
/// differs from the candidate SQL when a repair happened.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub result: ResultSet,
    pub executed_sql: String,
    pub repaired: bool,
}

#[derive(Debug)]
pub struct ExecutionError {
    pub message: String,
    /// SQL of the last attempt, recorded in history even on failure.
    pub last_sql: String,
    pub attempts: u32,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "query execution failed after {} attempt(s): {}",
            self.attempts, self.message
        )
    }
}

impl std::error::Error for ExecutionError {}

impl QueryExecutor {
    pub fn new(pool: DbPool, oracle: Arc<LlmManager>, timeout: Duration) -> Self {
        Self { pool, oracle, timeout }
    }

    /// Runs the candidate SQL. On a database error, asks the oracle once for
    /// a corrected statement and retries; a second failure is terminal.
    pub async fn execute(&self, sql: &str) -> Result<ExecutionOutcome, ExecutionError> {
        let first_error = match self.run_once(sql).await {
            Ok(result) => {
                return Ok(ExecutionOutcome {
                    result,
                    executed_sql: sql.to_string(),
                    repaired: false,
                });
            }
            Err(e) => e,
        };

        warn!("Query execution failed, attempting repair: {}", first_error);

        let repaired_sql = match self.repair(sql, &first_error).await {
            Some(repaired) => repaired,
            None => {
                return Err(ExecutionError {
                    message: first_error,
                    last_sql: sql.to_string(),
                    attempts: 1,
                });
            }
        };

        info!("Retrying with repaired SQL: {}", repaired_sql);

        match self.run_once(&repaired_sql).await {
            Ok(result) => Ok(ExecutionOutcome {
                result,
                executed_sql: repaired_sql,
                repaired: true,
            }),
            Err(second_error) => Err(ExecutionError {
                message: second_error,
                last_sql: repaired_sql,
                attempts: 2,
            }),
        }
    }

    /// One oracle round-trip for a corrected statement. Returns `None` when
    /// the oracle fails or the correction does not pass the safety checks.
    async fn repair(&self, failing_sql: &str, db_error: &str) -> Option<String> {
        let prompt = build_repair_prompt(failing_sql, db_error);
        let completion = match self.oracle.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Repair oracle call failed: {}", e);
                return None;
            }
        };

        let repaired = parse::extract_sql(&completion);
        if repaired.trim().is_empty() {
            warn!("Repair produced an empty statement");
            return None;
        }

        // A repaired statement goes back through the denylist before it
        // touches the database.
        let check = validate::validate(&repaired);
        if !check.is_valid {
            warn!("Repaired SQL failed validation: {}", check.errors.join("; "));
            return None;
        }

        Some(repaired)
    }

    async fn run_once(&self, sql: &str) -> Result<ResultSet, String> {
        let pool = self.pool.clone();
        let sql = sql.to_string();

        let task = tokio::task::spawn_blocking(move || run_blocking(&pool, &sql));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(format!("database task failed: {}", join_err)),
            Err(_) => Err(format!(
                "database query timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

fn run_blocking(pool: &DbPool, sql: &str) -> Result<ResultSet, String> {
    let conn = pool.get().map_err(|e| e.to_string())?;
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;

    let mut rows = stmt.query([]).map_err(|e| e.to_string())?;

    let mut names: Vec<String> = Vec::new();
    let mut data: Vec<Vec<CellValue>> = Vec::new();

    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
        let stmt_ref: &duckdb::Statement = row.as_ref();
        let column_count = stmt_ref.column_count();
        if names.is_empty() {
            for i in 0..column_count {
                let name = stmt_ref
                    .column_name(i)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|_| format!("column_{}", i));
                names.push(name);
            }
        }

        let cells = (0..column_count).map(|i| read_cell(row, i)).collect();
        data.push(cells);
    }

    Ok(ResultSet::new(names, data))
}

fn read_cell(row: &duckdb::Row, idx: usize) -> CellValue {
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => CellValue::Null,
        Ok(ValueRef::Boolean(b)) => CellValue::Bool(b),
        Ok(ValueRef::TinyInt(v)) => CellValue::Int(v as i64),
        Ok(ValueRef::SmallInt(v)) => CellValue::Int(v as i64),
        Ok(ValueRef::Int(v)) => CellValue::Int(v as i64),
        Ok(ValueRef::BigInt(v)) => CellValue::Int(v),
        Ok(ValueRef::UTinyInt(v)) => CellValue::Int(v as i64),
        Ok(ValueRef::USmallInt(v)) => CellValue::Int(v as i64),
        Ok(ValueRef::UInt(v)) => CellValue::Int(v as i64),
        Ok(ValueRef::Float(v)) => CellValue::Float(v as f64),
        Ok(ValueRef::Double(v)) => CellValue::Float(v),
        Ok(ValueRef::Text(bytes)) => {
            CellValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        // Dates, decimals, timestamps and everything else come back through
        // DuckDB's string conversion.
        _ => row
            .get::<_, String>(idx)
            .map(CellValue::Text)
            .unwrap_or(CellValue::Null),
    }
}

fn build_repair_prompt(failing_sql: &str, db_error: &str) -> String {
    format!(
        r#"The following DuckDB SQL query failed to execute.

### Failing query:
```sql
{failing_sql}
```

### Database error:
{db_error}

### Task:
Return a corrected, read-only SELECT query that fixes the error while answering the same question. Respond with only the SQL, inside a ```sql code fence.
"#,
    )
}
