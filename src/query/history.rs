//! Append-only record of every processed request. Writes are best-effort:
//! a failure here is logged and swallowed, never surfaced to the user.

use crate::db::db_pool::DbPool;
use crate::query::models::HistoryEntry;
use chrono::{DateTime, Utc};
use duckdb::params;
use tracing::{error, warn};

const CREATE_HISTORY_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS query_history (
        requestor VARCHAR,
        question VARCHAR NOT NULL,
        interpretation VARCHAR,
        sql_executed VARCHAR,
        oracle_response VARCHAR,
        result_snapshot VARCHAR,
        success BOOLEAN,
        execution_time_ms BIGINT,
        created_at VARCHAR
    )
";

pub struct HistoryRecorder {
    pool: DbPool,
}

impl HistoryRecorder {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates the history table. Called once at startup.
    pub async fn init(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let conn = pool.get()?;
            conn.execute(CREATE_HISTORY_TABLE, [])?;
            Ok(())
        })
        .await?
    }

    /// Appends one entry. Fire-and-forget from the caller's perspective:
    /// any failure is logged and absorbed here.
    pub async fn record(&self, entry: HistoryEntry) {
        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
            let conn = pool.get().map_err(|e| e.to_string())?;
            conn.execute(
                "INSERT INTO query_history (
                    requestor, question, interpretation, sql_executed,
                    oracle_response, result_snapshot, success,
                    execution_time_ms, created_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.requestor,
                    entry.question,
                    entry.interpretation,
                    entry.sql_executed,
                    entry.oracle_response,
                    entry.result_snapshot,
                    entry.success,
                    entry.execution_time_ms as i64,
                    entry.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to write history entry: {}", e),
            Err(e) => error!("History write task failed: {}", e),
        }
    }

    /// Recorded entries, most recent first, optionally filtered by
    /// requestor.
    pub async fn recent(
        &self,
        requestor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, Box<dyn std::error::Error + Send + Sync>> {
        let pool = self.pool.clone();
        let requestor = requestor.map(|s| s.to_string());

        tokio::task::spawn_blocking(move || -> Result<Vec<HistoryEntry>, Box<dyn std::error::Error + Send + Sync>> {
            let conn = pool.get()?;

            let base = "SELECT requestor, question, interpretation, sql_executed,
                               oracle_response, result_snapshot, success,
                               execution_time_ms, created_at
                        FROM query_history";

            let mut entries = Vec::new();
            let map_row = |row: &duckdb::Row| -> duckdb::Result<HistoryEntry> {
                let created_raw: String = row.get(8)?;
                let created_at = DateTime::parse_from_rfc3339(&created_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default();
                Ok(HistoryEntry {
                    requestor: row.get(0)?,
                    question: row.get(1)?,
                    interpretation: row.get(2)?,
                    sql_executed: row.get(3)?,
                    oracle_response: row.get(4)?,
                    result_snapshot: row.get(5)?,
                    success: row.get(6)?,
                    execution_time_ms: row.get::<_, i64>(7)? as u64,
                    created_at,
                })
            };

            match requestor {
                Some(who) => {
                    let sql = format!(
                        "{} WHERE requestor = ? ORDER BY created_at DESC LIMIT ?",
                        base
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params![who, limit as i64], map_row)?;
                    for row in rows {
                        entries.push(row?);
                    }
                }
                None => {
                    let sql = format!("{} ORDER BY created_at DESC LIMIT ?", base);
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params![limit as i64], map_row)?;
                    for row in rows {
                        entries.push(row?);
                    }
                }
            }

            Ok(entries)
        })
        .await?
    }

    /// Total recorded entries, for the status endpoint.
    pub async fn count(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
            let conn = pool.get()?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM query_history", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await?
    }
}
