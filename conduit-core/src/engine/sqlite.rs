//! SQLite engine (spec.md §4.1, §8 scenario 3): `?` placeholders, WAL mode
//! enabled at connect time so a Lead and its children can share one file
//! without writer starvation.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Column, Executor, Pool, Row, Sqlite, TypeInfo};

use crate::error::EngineError;
use crate::types::{ConnectionStatus, ParameterList, QueryResult, TypedValue};

use super::{double_quote_escape, ConnectionConfig, DbEngineKind, Engine, PreparedHandle};

pub struct SqliteEngine {
    pool: Pool<Sqlite>,
    status: ConnectionStatus,
    config: ConnectionConfig,
}

#[async_trait]
impl Engine for SqliteEngine {
    fn kind(&self) -> DbEngineKind {
        DbEngineKind::Sqlite
    }

    async fn connect(config: &ConnectionConfig) -> Result<Self, EngineError> {
        let options: SqliteConnectOptions = config
            .connection_string
            .parse()
            .map_err(|e: sqlx::Error| EngineError::Connect(e.to_string()))?;
        let options = options.journal_mode(SqliteJournalMode::Wal).create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections())
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
            query = bind_sqlite(query, &binding.value);
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

fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q TypedValue,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        TypedValue::Integer(v) => query.bind(v),
        TypedValue::String(v) => query.bind(v),
        TypedValue::Boolean(v) => query.bind(v),
        TypedValue::Float(v) => query.bind(v),
    }
}

fn rows_to_result(rows: &[SqliteRow], execution_time_ms: u64) -> QueryResult {
    let column_names: Vec<String> = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut objects = Vec::with_capacity(rows.len());
    for row in rows {
        let mut obj = serde_json::Map::with_capacity(row.columns().len());
        for (idx, column) in row.columns().iter().enumerate() {
            let value = sqlite_cell_to_json(row, idx, column.type_info().name());
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

fn sqlite_cell_to_json(row: &SqliteRow, idx: usize, type_name: &str) -> serde_json::Value {
    match type_name {
        "INTEGER" => row.try_get::<i64, _>(idx).map(Into::into).unwrap_or(serde_json::Value::Null),
        "REAL" => row
            .try_get::<f64, _>(idx)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        "BOOLEAN" => row.try_get::<bool, _>(idx).map(Into::into).unwrap_or(serde_json::Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null),
    }
}
