//! PostgreSQL row store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` in a short transaction so
//! concurrent workers never block on each other's rows. Identifiers are
//! quoted through [`super::ident`]; every value is a bound parameter.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::ident::{quote_all, quote_ident};
use super::{
    prompt_key, storage_error, ClaimedRow, ColumnInfo, RowKey, RowStore, StageCounts, StoreResult,
};
use crate::config::DatabaseConfig;
use crate::errors::{DataforgeError, RowWriteError, StorageError};
use crate::pipeline::StageDescriptor;

/// Row store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresRowStore {
    pool: PgPool,
    prompt_table: String,
    key_column: String,
}

impl PostgresRowStore {
    /// Connects using `config` and makes sure the prompt table exists.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            "Connecting to PostgreSQL"
        );

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user);
        if let Some(ref password) = config.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(|e| fail("connect", &e))?;

        let store = Self::from_pool(pool, config);
        store.ensure_prompt_table().await?;
        Ok(store)
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            prompt_table: config.prompt_table.clone(),
            key_column: config.key_column.clone(),
        }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the prompt table if it does not exist.
    pub async fn ensure_prompt_table(&self) -> StoreResult<()> {
        let sql = create_prompt_table_sql(&self.prompt_table).map_err(schema)?;
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| fail("ensure_prompt_table", &e))?;
        Ok(())
    }

    /// Stores or replaces the system prompt for `(table, stage)`.
    pub async fn set_system_prompt(&self, table: &str, stage: &str, prompt: &str) -> StoreResult<()> {
        let sql = upsert_prompt_sql(&self.prompt_table).map_err(schema)?;
        sqlx::query(&sql)
            .bind(prompt_key(table, stage))
            .bind(prompt)
            .execute(&self.pool)
            .await
            .map_err(|e| fail("set_system_prompt", &e))?;
        Ok(())
    }

    /// Closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn fail(operation: &str, err: &sqlx::Error) -> DataforgeError {
    storage_error(operation, StorageError::from_sqlx(operation, err))
}

fn schema(err: StorageError) -> DataforgeError {
    DataforgeError::Storage(err)
}

#[async_trait]
impl RowStore for PostgresRowStore {
    async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(TABLE_EXISTS_SQL)
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| fail("table_exists", &e))?;
        Ok(exists)
    }

    async fn table_columns(&self, table: &str) -> StoreResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(TABLE_COLUMNS_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| fail("table_columns", &e))?;

        rows.iter()
            .map(|row| -> Result<ColumnInfo, sqlx::Error> {
                let nullable: String = row.try_get(2)?;
                Ok(ColumnInfo {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| fail("table_columns", &e))
    }

    async fn ensure_column(&self, table: &str, column: &str) -> StoreResult<bool> {
        if self.column_exists(table, column).await? {
            return Ok(false);
        }
        let sql = add_column_sql(table, column).map_err(schema)?;
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| fail("ensure_column", &e))?;
        info!(table, column, "Created destination column");
        Ok(true)
    }

    async fn claim_next_unprocessed(
        &self,
        table: &str,
        stage: &StageDescriptor,
        exclude: &[RowKey],
    ) -> StoreResult<Option<ClaimedRow>> {
        const OP: &str = "claim_next_unprocessed";
        let sql = claim_sql(table, &self.key_column, stage).map_err(schema)?;

        let mut tx = self.pool.begin().await.map_err(|e| fail(OP, &e))?;
        let row = sqlx::query(&sql)
            .bind(exclude.to_vec())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| fail(OP, &e))?;

        let claimed = match row {
            Some(row) => {
                let key: i64 = row.try_get(0).map_err(|e| fail(OP, &e))?;
                let sources = (1..=stage.sources().len())
                    .map(|i| row.try_get::<String, _>(i))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| fail(OP, &e))?;
                Some(ClaimedRow { key, sources })
            }
            None => None,
        };
        tx.commit().await.map_err(|e| fail(OP, &e))?;

        if let Some(ref row) = claimed {
            debug!(table, stage = %stage.destination(), row = row.key, "Claimed row");
        }
        Ok(claimed)
    }

    async fn write_result(
        &self,
        table: &str,
        key: RowKey,
        destination: &str,
        value: &str,
    ) -> StoreResult<()> {
        let sql = write_result_sql(table, &self.key_column, destination).map_err(schema)?;
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| fail("write_result", &e))?;

        if result.rows_affected() == 0 {
            return Err(RowWriteError::new(table, key, destination).into());
        }
        Ok(())
    }

    async fn get_system_prompt(&self, table: &str, stage: &str) -> StoreResult<Option<String>> {
        let sql = select_prompt_sql(&self.prompt_table).map_err(schema)?;
        sqlx::query_scalar(&sql)
            .bind(prompt_key(table, stage))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| fail("get_system_prompt", &e))
    }

    async fn stage_counts(&self, table: &str, stage: &StageDescriptor) -> StoreResult<StageCounts> {
        let sql = stage_counts_sql(table, stage).map_err(schema)?;
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| fail("stage_counts", &e))?;

        let eligible: i64 = row.try_get(0).map_err(|e| fail("stage_counts", &e))?;
        let completed: i64 = row.try_get(1).map_err(|e| fail("stage_counts", &e))?;
        Ok(StageCounts {
            eligible: u64::try_from(eligible).unwrap_or(0),
            completed: u64::try_from(completed).unwrap_or(0),
        })
    }
}

const TABLE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_name = $1)";

const TABLE_COLUMNS_SQL: &str = "SELECT column_name::TEXT, data_type::TEXT, is_nullable::TEXT \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1 \
     ORDER BY ordinal_position";

fn not_null_predicate(quoted_sources: &[String]) -> String {
    quoted_sources
        .iter()
        .map(|s| format!("{s} IS NOT NULL"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Selects one pending row, skipping locked rows and keys bound as `$1`.
pub(crate) fn claim_sql(
    table: &str,
    key_column: &str,
    stage: &StageDescriptor,
) -> Result<String, StorageError> {
    let table = quote_ident(table)?;
    let key = quote_ident(key_column)?;
    let destination = quote_ident(stage.destination())?;
    let sources = quote_all(stage.sources())?;

    let columns = sources
        .iter()
        .map(|s| format!("{s}::TEXT"))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "SELECT {key}::BIGINT, {columns} FROM {table} \
         WHERE {destination} IS NULL AND {} AND NOT ({key}::BIGINT = ANY($1)) \
         ORDER BY {key} LIMIT 1 FOR UPDATE SKIP LOCKED",
        not_null_predicate(&sources)
    ))
}

/// Fills the destination of one row, only if it is still NULL.
pub(crate) fn write_result_sql(
    table: &str,
    key_column: &str,
    destination: &str,
) -> Result<String, StorageError> {
    let table = quote_ident(table)?;
    let key = quote_ident(key_column)?;
    let destination = quote_ident(destination)?;
    Ok(format!(
        "UPDATE {table} SET {destination} = $1 WHERE {key} = $2 AND {destination} IS NULL"
    ))
}

pub(crate) fn add_column_sql(table: &str, column: &str) -> Result<String, StorageError> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} TEXT",
        quote_ident(table)?,
        quote_ident(column)?
    ))
}

pub(crate) fn stage_counts_sql(table: &str, stage: &StageDescriptor) -> Result<String, StorageError> {
    let table = quote_ident(table)?;
    let destination = quote_ident(stage.destination())?;
    let eligible = not_null_predicate(&quote_all(stage.sources())?);
    Ok(format!(
        "SELECT COUNT(*) FILTER (WHERE {eligible}), \
         COUNT(*) FILTER (WHERE {eligible} AND {destination} IS NOT NULL) \
         FROM {table}"
    ))
}

pub(crate) fn create_prompt_table_sql(prompt_table: &str) -> Result<String, StorageError> {
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (stage VARCHAR(255) PRIMARY KEY, prompt TEXT NOT NULL)",
        quote_ident(prompt_table)?
    ))
}

pub(crate) fn select_prompt_sql(prompt_table: &str) -> Result<String, StorageError> {
    Ok(format!(
        "SELECT prompt FROM {} WHERE stage = $1",
        quote_ident(prompt_table)?
    ))
}

pub(crate) fn upsert_prompt_sql(prompt_table: &str) -> Result<String, StorageError> {
    Ok(format!(
        "INSERT INTO {} (stage, prompt) VALUES ($1, $2) \
         ON CONFLICT (stage) DO UPDATE SET prompt = EXCLUDED.prompt",
        quote_ident(prompt_table)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stage(spec: &str) -> StageDescriptor {
        spec.parse().unwrap()
    }

    #[test]
    fn test_claim_sql_single_source() {
        let sql = claim_sql("docs", "index", &stage("chunk:summary")).unwrap();
        assert_eq!(
            sql,
            "SELECT \"index\"::BIGINT, \"chunk\"::TEXT FROM \"docs\" \
             WHERE \"summary\" IS NULL AND \"chunk\" IS NOT NULL \
             AND NOT (\"index\"::BIGINT = ANY($1)) \
             ORDER BY \"index\" LIMIT 1 FOR UPDATE SKIP LOCKED"
        );
    }

    #[test]
    fn test_claim_sql_multi_source_keeps_order() {
        let sql = claim_sql("docs", "id", &stage("title+content:summary")).unwrap();
        assert!(sql.contains("\"title\"::TEXT, \"content\"::TEXT"));
        assert!(sql.contains("\"title\" IS NOT NULL AND \"content\" IS NOT NULL"));
        assert!(sql.contains("ORDER BY \"id\""));
    }

    #[test]
    fn test_write_result_sql_guards_destination() {
        let sql = write_result_sql("docs", "index", "summary").unwrap();
        assert_eq!(
            sql,
            "UPDATE \"docs\" SET \"summary\" = $1 WHERE \"index\" = $2 AND \"summary\" IS NULL"
        );
    }

    #[test]
    fn test_identifiers_are_quoted() {
        let sql = add_column_sql("my table", "odd\"name").unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"my table\" ADD COLUMN IF NOT EXISTS \"odd\"\"name\" TEXT"
        );
        assert!(add_column_sql("", "x").is_err());
    }

    #[test]
    fn test_stage_counts_sql() {
        let sql = stage_counts_sql("docs", &stage("a+b:c")).unwrap();
        assert!(sql.starts_with(
            "SELECT COUNT(*) FILTER (WHERE \"a\" IS NOT NULL AND \"b\" IS NOT NULL)"
        ));
        assert!(sql.contains("AND \"c\" IS NOT NULL)"));
    }

    #[test]
    fn test_prompt_sql() {
        assert_eq!(
            select_prompt_sql("cliDataForgeSystem").unwrap(),
            "SELECT prompt FROM \"cliDataForgeSystem\" WHERE stage = $1"
        );
        assert!(upsert_prompt_sql("cliDataForgeSystem")
            .unwrap()
            .contains("ON CONFLICT (stage)"));
        assert!(create_prompt_table_sql("p")
            .unwrap()
            .starts_with("CREATE TABLE IF NOT EXISTS \"p\""));
    }
}
