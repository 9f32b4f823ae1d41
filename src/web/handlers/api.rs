use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::query::models::{ConversationContext, QueryRequest, QueryResponse};
use crate::web::state::AppState;

const MAX_QUESTION_LEN: usize = 1000;
const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct NlQueryBody {
    pub question: String,
    pub requestor: Option<String>,
    pub context: Option<ConversationContext>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub requestor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub history_count: u64,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub database: &'static str,
    pub oracle: &'static str,
}

// Natural language query
pub async fn process_query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NlQueryBody>,
) -> Result<Json<QueryResponse>, (StatusCode, String)> {
    let question = body.question.trim().to_string();
    if question.is_empty() || question.chars().count() > MAX_QUESTION_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("question must be 1-{} characters", MAX_QUESTION_LEN),
        ));
    }

    let request = QueryRequest {
        question,
        requestor: body.requestor,
        context: body.context,
    };

    let response = state.pipeline.process(request).await;
    Ok(Json(response))
}

// Query history, most recent first
pub async fn query_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let entries = state
        .pipeline
        .history()
        .recent(params.requestor.as_deref(), limit)
        .await
        .map_err(|e| {
            error!("Failed to read query history: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read query history".to_string(),
            )
        })?;

    Ok(Json(serde_json::json!({ "history": entries })))
}

// System status
pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, (StatusCode, String)> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds();

    let history_count = state.pipeline.history().count().await.map_err(|e| {
        error!("Failed to count history entries: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Database error".to_string(),
        )
    })?;

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        history_count,
    }))
}

// Liveness, with per-dependency reachability flags
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    let database = match state.pipeline.history().count().await {
        Ok(_) => "connected",
        Err(_) => "unavailable",
    };
    let oracle = if state.oracle.health_check().await {
        "connected"
    } else {
        "unavailable"
    };
    Json(Health {
        status: "healthy",
        database,
        oracle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::query::tests::{oracle_with, seeded_pool};

    fn state_with(tag: &str, responses: Vec<Result<String, String>>) -> Arc<AppState> {
        let pool = seeded_pool(tag);
        let (oracle, _calls) = oracle_with(responses);
        Arc::new(AppState::new(&AppConfig::default(), pool, oracle))
    }

    fn no_query_translation() -> String {
        serde_json::json!({
            "interpretation": "No data needed",
            "sqlQuery": "NONE",
            "visualizationType": "table",
        })
        .to_string()
    }

    #[tokio::test]
    async fn question_bound_counts_characters_not_bytes() {
        // 600 two-byte characters: over 1000 bytes but under the limit
        let state = state_with("api_multibyte", vec![Ok(no_query_translation())]);
        let body = NlQueryBody {
            question: "é".repeat(600),
            requestor: None,
            context: None,
        };
        let result = process_query(State(state), Json(body)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn overlong_question_is_rejected() {
        let state = state_with("api_too_long", vec![]);
        let body = NlQueryBody {
            question: "a".repeat(MAX_QUESTION_LEN + 1),
            requestor: None,
            context: None,
        };
        let (status, _) = process_query(State(state), Json(body)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_database_and_oracle() {
        let state = state_with("api_health_ok", vec![Ok("OK".to_string())]);
        state.pipeline.init().await.unwrap();

        let Json(report) = health(State(state)).await;
        assert_eq!(report.status, "healthy");
        assert_eq!(report.database, "connected");
        assert_eq!(report.oracle, "connected");
    }

    #[tokio::test]
    async fn health_flags_unreachable_oracle() {
        let state = state_with("api_health_down", vec![Err("offline".to_string())]);
        state.pipeline.init().await.unwrap();

        let Json(report) = health(State(state)).await;
        assert_eq!(report.database, "connected");
        assert_eq!(report.oracle, "unavailable");
    }
}
