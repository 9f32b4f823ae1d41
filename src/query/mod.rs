//! The natural-language query pipeline: schema context, translation,
//! validation, execution with one-shot repair, insight synthesis, and
//! history recording. Sequential within a request; independent across
//! requests.

pub mod execute;
pub mod history;
pub mod insights;
pub mod models;
pub mod parse;
pub mod schema;
pub mod translate;
pub mod validate;

use crate::config::AppConfig;
use crate::db::db_pool::DbPool;
use crate::llm::LlmManager;
use chrono::Utc;
use execute::QueryExecutor;
use history::HistoryRecorder;
use insights::InsightSynthesizer;
use models::{
    HistoryEntry, QueryRequest, QueryResponse, TranslationResult, VisualizationType,
    NO_QUERY_SENTINEL,
};
use schema::SchemaIntrospector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use translate::QueryTranslator;

pub struct QueryPipeline {
    introspector: SchemaIntrospector,
    translator: QueryTranslator,
    executor: QueryExecutor,
    synthesizer: InsightSynthesizer,
    history: HistoryRecorder,
}

impl QueryPipeline {
    pub fn new(pool: DbPool, oracle: Arc<LlmManager>, config: &AppConfig) -> Self {
        Self {
            introspector: SchemaIntrospector::new(pool.clone()),
            translator: QueryTranslator::new(Arc::clone(&oracle)),
            executor: QueryExecutor::new(
                pool.clone(),
                Arc::clone(&oracle),
                Duration::from_secs(config.database.execution_timeout_secs),
            ),
            synthesizer: InsightSynthesizer::new(oracle),
            history: HistoryRecorder::new(pool),
        }
    }

    /// Creates the backing history table. Called once at startup.
    pub async fn init(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.history.init().await
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    /// Processes one request end to end. Always returns a structured
    /// response; only unsafe SQL and post-repair execution failures surface
    /// as `success: false`.
    pub async fn process(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();
        info!("Processing question: {}", request.question);

        let schema_context = self.introspector.schema_context().await;
        let translation = self
            .translator
            .translate(&request.question, request.context.as_ref(), &schema_context)
            .await;

        let response = match translation.sql_query.clone() {
            None => self.no_query_response(&request, &translation, started),
            Some(sql) => self.run_query(&request, &translation, sql, started).await,
        };

        self.record_history(&request, &translation, &response).await;
        response
    }

    /// NONE sentinel path: no execution, empty data, success.
    fn no_query_response(
        &self,
        request: &QueryRequest,
        translation: &TranslationResult,
        started: Instant,
    ) -> QueryResponse {
        QueryResponse {
            success: true,
            query: request.question.clone(),
            interpretation: translation.interpretation.clone(),
            sql_query: NO_QUERY_SENTINEL.to_string(),
            data: Vec::new(),
            insights: vec![
                "No database query was needed to answer this question.".to_string(),
            ],
            visualization_type: translation.visualization,
            execution_time: started.elapsed().as_millis() as u64,
            error: None,
        }
    }

    async fn run_query(
        &self,
        request: &QueryRequest,
        translation: &TranslationResult,
        sql: String,
        started: Instant,
    ) -> QueryResponse {
        let validation = validate::validate(&sql);
        if !validation.is_valid {
            warn!(
                "Generated SQL rejected by validator: {}",
                validation.errors.join("; ")
            );
            return QueryResponse {
                success: false,
                query: request.question.clone(),
                interpretation: translation.interpretation.clone(),
                sql_query: sql,
                data: Vec::new(),
                insights: vec![
                    "The generated query was rejected by safety checks. Please try rephrasing your question."
                        .to_string(),
                ],
                visualization_type: VisualizationType::Error,
                execution_time: started.elapsed().as_millis() as u64,
                error: Some(format!(
                    "invalid query generated: {}",
                    validation.errors.join("; ")
                )),
            };
        }
        for warning in &validation.warnings {
            warn!("Validator warning: {}", warning);
        }

        match self.executor.execute(&sql).await {
            Ok(outcome) => {
                let insights = self
                    .synthesizer
                    .synthesize(&request.question, &outcome.result, &translation.interpretation)
                    .await;

                QueryResponse {
                    success: true,
                    query: request.question.clone(),
                    interpretation: translation.interpretation.clone(),
                    sql_query: outcome.executed_sql,
                    data: outcome.result.to_json_rows(),
                    insights,
                    visualization_type: translation.visualization,
                    execution_time: started.elapsed().as_millis() as u64,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Query failed terminally: {}", e);
                QueryResponse {
                    success: false,
                    query: request.question.clone(),
                    interpretation: translation.interpretation.clone(),
                    sql_query: e.last_sql.clone(),
                    data: Vec::new(),
                    insights: vec![
                        "Query processing failed. Please try rephrasing your question."
                            .to_string(),
                    ],
                    visualization_type: VisualizationType::Error,
                    execution_time: started.elapsed().as_millis() as u64,
                    error: Some(e.message),
                }
            }
        }
    }

    async fn record_history(
        &self,
        request: &QueryRequest,
        translation: &TranslationResult,
        response: &QueryResponse,
    ) {
        let snapshot_rows: Vec<_> = response
            .data
            .iter()
            .take(insights::SAMPLE_ROWS)
            .cloned()
            .collect();

        let entry = HistoryEntry {
            requestor: request.requestor.clone(),
            question: request.question.clone(),
            interpretation: response.interpretation.clone(),
            sql_executed: response.sql_query.clone(),
            oracle_response: serde_json::to_string(translation)
                .unwrap_or_else(|_| "{}".to_string()),
            result_snapshot: serde_json::to_string(&snapshot_rows)
                .unwrap_or_else(|_| "[]".to_string()),
            success: response.success,
            execution_time_ms: response.execution_time,
            created_at: Utc::now(),
        };

        self.history.record(entry).await;
    }
}

// Test scaffolding shared by the pipeline modules: a scripted oracle and
// throwaway on-disk DuckDB databases (a :memory: pool would give every
// pooled connection its own private database).
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::db_pool::DuckDbConnectionManager;
    use crate::llm::{LlmError, TextCompletion};
    use async_trait::async_trait;
    use r2d2::Pool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Oracle that replays scripted responses, counting calls and keeping
    /// every prompt it was sent.
    pub struct MockOracle {
        responses: Mutex<Vec<Result<String, String>>>,
        pub calls: Arc<AtomicUsize>,
        pub prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TextCompletion for MockOracle {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::ResponseError("no scripted response".to_string()));
            }
            responses
                .remove(0)
                .map_err(LlmError::ConnectionError)
        }
    }

    /// Builds an `LlmManager` around a scripted oracle; returns the shared
    /// call counter alongside it.
    pub fn oracle_with(
        responses: Vec<Result<String, String>>,
    ) -> (Arc<LlmManager>, Arc<AtomicUsize>) {
        let (oracle, calls, _prompts) = oracle_recording(responses);
        (oracle, calls)
    }

    /// Like [`oracle_with`], but also hands back the recorded prompts.
    pub fn oracle_recording(
        responses: Vec<Result<String, String>>,
    ) -> (Arc<LlmManager>, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let oracle = MockOracle {
            responses: Mutex::new(responses),
            calls: Arc::clone(&calls),
            prompts: Arc::clone(&prompts),
        };
        (
            Arc::new(LlmManager::with_provider(
                Box::new(oracle),
                Duration::from_secs(5),
            )),
            calls,
            prompts,
        )
    }

    pub fn temp_db_path(tag: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir()
            .join(format!(
                "nl_insight_test_{}_{}_{}.duckdb",
                tag,
                std::process::id(),
                n
            ))
            .to_string_lossy()
            .to_string()
    }

    /// Fresh database seeded with the sales fact table and stores dimension.
    pub fn seeded_pool(tag: &str) -> DbPool {
        // One pooled connection: DuckDB holds a per-file lock
        let manager = DuckDbConnectionManager::new(temp_db_path(tag));
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "CREATE TABLE stores (
                 store_id BIGINT, store_name VARCHAR, region VARCHAR,
                 city VARCHAR, opened_date DATE
             );
             CREATE TABLE sales (
                 id BIGINT, store_id BIGINT, product_name VARCHAR,
                 sale_date DATE, quantity INTEGER, unit_price DOUBLE,
                 total_amount DOUBLE, is_promotional BOOLEAN
             );
             INSERT INTO stores VALUES
                 (1, 'Downtown', 'West', 'Portland', DATE '2019-05-01'),
                 (2, 'Riverside', 'East', 'Boston', DATE '2021-02-14');
             INSERT INTO sales VALUES
                 (1, 1, 'Widget', DATE '2024-01-05', 2, 9.99, 19.98, false),
                 (2, 1, 'Gadget', DATE '2024-01-06', 1, 24.50, 24.50, true),
                 (3, 2, 'Widget', DATE '2024-01-07', 5, 9.99, 49.95, false);",
        )
        .unwrap();
        pool
    }

    fn pipeline_with(
        tag: &str,
        responses: Vec<Result<String, String>>,
    ) -> (QueryPipeline, Arc<AtomicUsize>) {
        let pool = seeded_pool(tag);
        let (oracle, calls) = oracle_with(responses);
        let config = AppConfig::default();
        (QueryPipeline::new(pool, oracle, &config), calls)
    }

    fn request(question: &str) -> QueryRequest {
        QueryRequest {
            question: question.to_string(),
            requestor: Some("tester".to_string()),
            context: None,
        }
    }

    fn translation_json(sql: &str, viz: &str) -> String {
        serde_json::json!({
            "interpretation": "Stores ranked by sales",
            "sqlQuery": sql,
            "visualizationType": viz,
            "reasoning": "aggregate and sort",
            "expectedInsights": ["top store"],
        })
        .to_string()
    }

    #[tokio::test]
    async fn healthy_path_returns_data_and_records_history() {
        let sql = "SELECT s.store_name, SUM(f.total_amount) AS total_sales \
                   FROM sales f JOIN stores s ON f.store_id = s.store_id \
                   GROUP BY s.store_name ORDER BY total_sales DESC";
        let (pipeline, calls) = pipeline_with(
            "pipe_ok",
            vec![
                Ok(translation_json(sql, "bar")),
                Ok(r#"["West coast leads"]"#.to_string()),
            ],
        );
        pipeline.init().await.unwrap();

        let response = pipeline
            .process(request("Which store has the highest sales?"))
            .await;

        assert!(response.success);
        assert!(response.sql_query.contains("GROUP BY"));
        assert!(!response.data.is_empty());
        assert_eq!(response.visualization_type, VisualizationType::Bar);
        assert!(response.insights.len() <= insights::MAX_INSIGHTS);
        // Translate + insight synthesis, no repair
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let history = pipeline.history().recent(Some("tester"), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].sql_executed, response.sql_query);
    }

    #[tokio::test]
    async fn conversation_context_reaches_translation_prompt() {
        let pool = seeded_pool("pipe_context");
        let (oracle, _calls, prompts) =
            oracle_recording(vec![Ok(translation_json("NONE", "table"))]);
        let config = AppConfig::default();
        let pipeline = QueryPipeline::new(pool, oracle, &config);
        pipeline.init().await.unwrap();

        let request = QueryRequest {
            question: "and what about last week?".to_string(),
            requestor: None,
            context: Some(models::ConversationContext {
                conversation_id: Some("conv-7".to_string()),
                previous_queries: vec!["total sales this week".to_string()],
                preferences: None,
            }),
        };
        pipeline.process(request).await;

        let recorded = prompts.lock().unwrap();
        assert!(recorded[0].contains("total sales this week"));
        assert!(recorded[0].contains("conv-7"));
    }

    #[tokio::test]
    async fn none_sentinel_skips_execution() {
        let (pipeline, calls) = pipeline_with(
            "pipe_none",
            vec![Ok(translation_json("NONE", "table"))],
        );
        pipeline.init().await.unwrap();

        let response = pipeline.process(request("asdkjasd")).await;

        assert!(response.success);
        assert!(response.data.is_empty());
        assert!(response.insights[0].contains("No database query was needed"));
        // Only the translation call - no execution, no insight oracle call
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_translation_still_executes() {
        let (pipeline, _calls) = pipeline_with(
            "pipe_fallback",
            vec![
                Ok("this is not json".to_string()),
                Ok("[]".to_string()),
            ],
        );
        pipeline.init().await.unwrap();

        let response = pipeline.process(request("garbled question")).await;

        assert!(response.success);
        assert_eq!(
            response.sql_query,
            "SELECT COUNT(*) AS total_records FROM sales"
        );
        assert_eq!(response.visualization_type, VisualizationType::Table);
        assert_eq!(response.data.len(), 1);
    }

    #[tokio::test]
    async fn unsafe_sql_is_never_executed() {
        let (pipeline, calls) = pipeline_with(
            "pipe_unsafe",
            vec![Ok(translation_json(
                "SELECT * FROM sales; DROP TABLE sales",
                "table",
            ))],
        );
        pipeline.init().await.unwrap();

        let response = pipeline.process(request("break things")).await;

        assert!(!response.success);
        assert!(response.error.as_deref().unwrap().contains("invalid query generated"));
        assert_eq!(response.visualization_type, VisualizationType::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The fact table survived
        let history = pipeline.history().recent(None, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
    }

    #[tokio::test]
    async fn repair_success_records_corrected_sql() {
        let (pipeline, calls) = pipeline_with(
            "pipe_repair",
            vec![
                Ok(translation_json("SELECT missing_col FROM sales", "table")),
                Ok("```sql\nSELECT COUNT(*) AS total_count FROM sales\n```".to_string()),
                Ok("[]".to_string()),
            ],
        );
        pipeline.init().await.unwrap();

        let response = pipeline.process(request("count sales")).await;

        assert!(response.success);
        assert_eq!(response.sql_query, "SELECT COUNT(*) AS total_count FROM sales");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let history = pipeline.history().recent(None, 10).await.unwrap();
        assert_eq!(
            history[0].sql_executed,
            "SELECT COUNT(*) AS total_count FROM sales"
        );
    }

    #[tokio::test]
    async fn double_failure_returns_structured_error_and_history() {
        let (pipeline, calls) = pipeline_with(
            "pipe_fail",
            vec![
                Ok(translation_json("SELECT * FROM no_such_table", "table")),
                Ok("SELECT * FROM still_missing".to_string()),
            ],
        );
        pipeline.init().await.unwrap();

        let response = pipeline.process(request("doomed question")).await;

        assert!(!response.success);
        assert!(response.error.is_some());
        assert!(!response.insights.is_empty());
        assert!(!response.interpretation.is_empty());
        // Translate + exactly one repair call, no insight call
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let history = pipeline.history().recent(None, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].sql_executed, "SELECT * FROM still_missing");
    }
}
