use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// REST API for the query pipeline
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .route("/query", post(handlers::api::process_query))
                .route("/history", get(handlers::api::query_history))
                .route("/status", get(handlers::api::system_status)),
        )
        .route("/health", get(handlers::api::health))
}
