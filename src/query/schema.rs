//! Schema grounding context for the translation prompt. Reads the live
//! catalog and falls back to a static description when that fails, so the
//! rest of the pipeline stays operable without introspection.

use crate::db::db_pool::DbPool;
use tracing::warn;

/// Primary fact table generated SQL runs against.
pub const FACT_TABLE: &str = "sales";
/// Store dimension joined via `store_id`.
pub const DIMENSION_TABLE: &str = "stores";

/// Expected layout, used whenever the catalog cannot be read.
const STATIC_SCHEMA: &str = "\
Table: sales
| Column | Type |
|--------|------|
| id | BIGINT |
| store_id | BIGINT |
| product_name | VARCHAR |
| sale_date | DATE |
| quantity | INTEGER |
| unit_price | DOUBLE |
| total_amount | DOUBLE |
| is_promotional | BOOLEAN |

Table: stores
| Column | Type |
|--------|------|
| store_id | BIGINT |
| store_name | VARCHAR |
| region | VARCHAR |
| city | VARCHAR |
| opened_date | DATE |
";

pub struct SchemaIntrospector {
    pool: DbPool,
}

impl SchemaIntrospector {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Produces the textual schema description for the fact and dimension
    /// tables. Never fails: any catalog error is absorbed and the static
    /// description is returned instead.
    pub async fn schema_context(&self) -> String {
        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || read_catalog(&pool)).await;

        match result {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                warn!("Schema introspection failed, using static schema: {}", e);
                STATIC_SCHEMA.to_string()
            }
            Err(e) => {
                warn!("Schema introspection task failed, using static schema: {}", e);
                STATIC_SCHEMA.to_string()
            }
        }
    }
}

fn read_catalog(pool: &DbPool) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let conn = pool.get()?;
    let mut context = String::new();

    for table in [FACT_TABLE, DIMENSION_TABLE] {
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type
             FROM information_schema.columns
             WHERE table_name = ?
             ORDER BY ordinal_position",
        )?;
        let columns: Vec<(String, String)> = stmt
            .query_map([table], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .filter_map(Result::ok)
            .collect();

        if columns.is_empty() {
            continue;
        }

        context.push_str(&format!("Table: {}\n", table));
        context.push_str("| Column | Type |\n|--------|------|\n");
        for (name, data_type) in columns {
            context.push_str(&format!("| {} | {} |\n", name, data_type));
        }
        context.push('\n');
    }

    if context.is_empty() {
        return Err("no catalog entries for the expected tables".into());
    }

    Ok(context)
}
