//! PostgreSQL engine (spec.md §4.1, §8 scenario 2): `$1, $2, ...` bind
//! placeholders, native `LISTEN`/`NOTIFY` left untouched for callers that
//! issue it as a plain query, JSON rows serialized via `sqlx::postgres`'s
//! row/column introspection.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Pool, Postgres, Row, TypeInfo};

use crate::error::EngineError;
use crate::types::{ConnectionStatus, ParameterList, QueryResult, TypedValue};

use super::{double_quote_escape, ConnectionConfig, DbEngineKind, Engine, PreparedHandle};

pub struct PostgresEngine {
    pool: Pool<Postgres>,
    status: ConnectionStatus,
    config: ConnectionConfig,
}

#[async_trait]
impl Engine for PostgresEngine {
    fn kind(&self) -> DbEngineKind {
        DbEngineKind::Postgres
    }

    async fn connect(config: &ConnectionConfig) -> Result<Self, EngineError> {
        let options: PgConnectOptions = config
            .connection_string
            .parse()
            .map_err(|e: sqlx::Error| EngineError::Connect(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.min_connections())
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        Ok(Self {
            pool,
            status: ConnectionStatus::Connected,
            config: config.clone(),
        })
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }

    async fn reset_connection(&mut self) -> Result<(), EngineError> {
        self.status = ConnectionStatus::Connecting;
        *self = Self::connect(&self.config).await?;
        Ok(())
    }

    async fn health_check(&mut self) -> Result<(), EngineError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                self.status = ConnectionStatus::Error;
                EngineError::Driver(e.to_string())
            })
    }

    async fn execute_query(&mut self, sql: &str, bindings: &ParameterList) -> Result<QueryResult, EngineError> {
        let start = Instant::now();
        let mut query = sqlx::query(sql);
        for binding in bindings {
            query = bind_postgres(query, &binding.value);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| EngineError::Driver(e.to_string()))?;
        Ok(rows_to_result(&rows, start.elapsed().as_millis() as u64))
    }

    async fn prepare_statement(&mut self, sql: &str) -> Result<PreparedHandle, EngineError> {
        self.pool
            .prepare(sql)
            .await
            .map(|_| PreparedHandle(sql.to_string()))
            .map_err(|e| EngineError::InvalidSql(e.to_string()))
    }

    async fn execute_prepared(
        &mut self,
        handle: &PreparedHandle,
        bindings: &ParameterList,
    ) -> Result<QueryResult, EngineError> {
        self.execute_query(&handle.0, bindings).await
    }

    async fn unprepare_statement(&mut self, _handle: PreparedHandle) -> Result<(), EngineError> {
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<(), EngineError> {
        sqlx::query("BEGIN")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Driver(e.to_string()))
    }

    async fn commit_transaction(&mut self) -> Result<(), EngineError> {
        sqlx::query("COMMIT")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Driver(e.to_string()))
    }

    async fn rollback_transaction(&mut self) -> Result<(), EngineError> {
        sqlx::query("ROLLBACK")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Driver(e.to_string()))
    }

    fn escape_string(&self, input: &str) -> String {
        double_quote_escape(input, '\'')
    }
}

fn bind_postgres<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    value: &'q TypedValue,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    match value {
        TypedValue::Integer(v) => query.bind(v),
        TypedValue::String(v) => query.bind(v),
        TypedValue::Boolean(v) => query.bind(v),
        TypedValue::Float(v) => query.bind(v),
    }
}

/// Converts result rows into the `rows_json`/`column_names` shape spec.md
/// §3 requires, falling back to the column's text representation for types
/// we don't special-case (matches `hook-common`'s JSONB passthrough habit).
fn rows_to_result(rows: &[PgRow], execution_time_ms: u64) -> QueryResult {
    let column_names: Vec<String> = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut objects = Vec::with_capacity(rows.len());
    for row in rows {
        let mut obj = serde_json::Map::with_capacity(row.columns().len());
        for (idx, column) in row.columns().iter().enumerate() {
            let value = pg_cell_to_json(row, idx, column.type_info().name());
            obj.insert(column.name().to_string(), value);
        }
        objects.push(serde_json::Value::Object(obj));
    }

    QueryResult {
        success: true,
        row_count: rows.len() as u64,
        column_count: column_names.len() as u32,
        rows_json: serde_json::Value::Array(objects).to_string(),
        column_names: Some(column_names),
        error_message: None,
        execution_time_ms,
        affected_rows: 0,
    }
}

fn pg_cell_to_json(row: &PgRow, idx: usize, type_name: &str) -> serde_json::Value {
    match type_name {
        "INT2" | "INT4" => row.try_get::<i32, _>(idx).map(Into::into).unwrap_or(serde_json::Value::Null),
        "INT8" => row.try_get::<i64, _>(idx).map(Into::into).unwrap_or(serde_json::Value::Null),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => row
            .try_get::<f64, _>(idx)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        "BOOL" => row.try_get::<bool, _>(idx).map(Into::into).unwrap_or(serde_json::Value::Null),
        "JSON" | "JSONB" => row.try_get::<serde_json::Value, _>(idx).unwrap_or(serde_json::Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null),
    }
}
