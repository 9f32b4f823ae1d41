use crate::config::AppConfig;
use crate::db::db_pool::DbPool;
use crate::llm::LlmManager;
use crate::query::QueryPipeline;
use std::sync::Arc;

/// Shared application state for the web server.
pub struct AppState {
    pub pipeline: QueryPipeline,
    pub oracle: Arc<LlmManager>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: &AppConfig, pool: DbPool, oracle: Arc<LlmManager>) -> Self {
        let pipeline = QueryPipeline::new(pool, Arc::clone(&oracle), config);
        Self {
            pipeline,
            oracle,
            startup_time: chrono::Utc::now(),
        }
    }
}
