//! Engine Interface (spec.md §4.1): one trait implemented once per backend.
//! Every Lead/child worker in the queue hierarchy talks to its database only
//! through this trait, never through a backend-specific type directly.

#[cfg(feature = "engine-db2")]
pub mod db2;
#[cfg(feature = "engine-mysql")]
pub mod mysql;
#[cfg(feature = "engine-postgres")]
pub mod postgres;
#[cfg(feature = "engine-sqlite")]
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{ConnectionStatus, ParameterList, QueryResult};

/// Which backend a `ConnectionConfig` addresses. Drives both the engine
/// constructed at startup and the placeholder style used by the parameter
/// processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEngineKind {
    Postgres,
    Sqlite,
    MySql,
    Db2,
}

impl DbEngineKind {
    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            DbEngineKind::Postgres => PlaceholderStyle::Postgres,
            DbEngineKind::Sqlite | DbEngineKind::MySql | DbEngineKind::Db2 => PlaceholderStyle::QuestionMark,
        }
    }
}

/// The two placeholder dialects spec.md §4.3 calls out: Postgres's
/// positional `$1, $2, ...` and everyone else's repeated `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    Postgres,
    QuestionMark,
}

/// Connection parameters for one database, independent of backend (spec.md
/// §3 `ConnectionConfig`). Mirrors `cyclotron_core::PoolConfig`'s shape:
/// a connection string plus optional pool-sizing knobs with sane defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub kind: DbEngineKind,
    pub connection_string: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_seconds: Option<u64>,
    pub connect_retry_backoff_ms: Option<u64>,
}

impl ConnectionConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds.unwrap_or(30))
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections.unwrap_or(10)
    }

    pub fn min_connections(&self) -> u32 {
        self.min_connections.unwrap_or(1)
    }
}

/// A prepared statement handle, opaque to callers outside the engine impl
/// that produced it.
pub struct PreparedHandle(pub String);

/// One database connection, exclusively owned by a single queue worker
/// (spec.md §4.1: "a worker never shares its connection"). Implementations
/// live under `engine/{postgres,sqlite,mysql,db2}.rs`.
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> DbEngineKind;

    async fn connect(config: &ConnectionConfig) -> Result<Self, EngineError>
    where
        Self: Sized;

    fn status(&self) -> ConnectionStatus;

    /// Drops the current connection and re-establishes it, used by the
    /// Lead's heartbeat recovery path (spec.md §4.6).
    async fn reset_connection(&mut self) -> Result<(), EngineError>;

    /// Cheap liveness probe, distinct from a full reconnect.
    async fn health_check(&mut self) -> Result<(), EngineError>;

    async fn execute_query(&mut self, sql: &str, bindings: &ParameterList) -> Result<QueryResult, EngineError>;

    async fn prepare_statement(&mut self, sql: &str) -> Result<PreparedHandle, EngineError>;

    async fn execute_prepared(
        &mut self,
        handle: &PreparedHandle,
        bindings: &ParameterList,
    ) -> Result<QueryResult, EngineError>;

    async fn unprepare_statement(&mut self, handle: PreparedHandle) -> Result<(), EngineError>;

    async fn begin_transaction(&mut self) -> Result<(), EngineError>;
    async fn commit_transaction(&mut self) -> Result<(), EngineError>;
    async fn rollback_transaction(&mut self) -> Result<(), EngineError>;

    /// Backend-native string literal escaping, used only where bind
    /// parameters cannot be used (spec.md §4.1 edge case).
    fn escape_string(&self, input: &str) -> String;
}

/// Connects using the concrete implementation selected by `config.kind`,
/// boxed behind the trait object every queue worker actually holds. The
/// match arms are feature-gated so a build can omit drivers it never needs
/// (spec.md §9: "libraries may still be optional").
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Engine>, EngineError> {
    match config.kind {
        #[cfg(feature = "engine-postgres")]
        DbEngineKind::Postgres => Ok(Box::new(postgres::PostgresEngine::connect(config).await?)),
        #[cfg(feature = "engine-sqlite")]
        DbEngineKind::Sqlite => Ok(Box::new(sqlite::SqliteEngine::connect(config).await?)),
        #[cfg(feature = "engine-mysql")]
        DbEngineKind::MySql => Ok(Box::new(mysql::MySqlEngine::connect(config).await?)),
        #[cfg(feature = "engine-db2")]
        DbEngineKind::Db2 => Ok(Box::new(db2::Db2Engine::connect(config).await?)),
        #[allow(unreachable_patterns)]
        other => Err(EngineError::Connect(format!("{other:?} support not compiled into this build"))),
    }
}

/// Doubles the quoting character, the one escaping rule shared by every
/// backend this crate supports; kept here so each engine impl's
/// `escape_string` reduces to one call.
pub fn double_quote_escape(input: &str, quote: char) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c == quote {
            out.push(quote);
        }
        out.push(c);
    }
    out
}
