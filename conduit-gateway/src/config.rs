//! Process configuration (spec.md §6): an `envconfig`-driven process config
//! for bind address and the config file path, plus the JSON file describing
//! every database the gateway manages. `${env.VAR}` substitution runs as a
//! pass over the parsed JSON values, before they're deserialized into
//! typed structs.

use std::collections::HashMap;
use std::path::Path;

use conduit_core::dqm::lead::TagLimits;
use conduit_core::engine::{ConnectionConfig, DbEngineKind};
use conduit_core::tags::QueueKind;
use envconfig::Envconfig;
use serde::Deserialize;
use serde_json::Value;

#[derive(Envconfig)]
pub struct ProcessConfig {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(from = "CONDUIT_DATABASES_CONFIG", default = "databases.json")]
    pub databases_config_path: String,

    #[envconfig(from = "RUST_LOG", default = "info")]
    pub log_filter: String,
}

impl ProcessConfig {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
pub struct DatabasesFile {
    pub databases: DatabasesSection,
}

#[derive(Debug, Deserialize)]
pub struct DatabasesSection {
    #[serde(default = "default_workers")]
    pub default_workers: usize,
    #[serde(default = "default_max_child_queues")]
    pub max_child_queues: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    pub connections: Vec<ConnectionFile>,
}

fn default_workers() -> usize {
    1
}

fn default_max_child_queues() -> usize {
    16
}

fn default_heartbeat_interval() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct ConnectionFile {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub name: String,
    pub engine: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// SQLite's file path, when `engine` is `sqlite`; overrides `database`.
    #[serde(default)]
    pub path: Option<String>,
    pub bootstrap_query: String,
    #[serde(default)]
    pub queues: HashMap<String, QueueLimitsFile>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct QueueLimitsFile {
    #[serde(default)]
    pub min: usize,
    #[serde(default)]
    pub max: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read database config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse database config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown engine kind: {0}")]
    UnknownEngine(String),
}

pub fn load_databases_file(path: &Path) -> Result<DatabasesFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut value: serde_json::Value = serde_json::from_str(&raw)?;
    substitute_env_value(&mut value);
    Ok(serde_json::from_value(value)?)
}

/// Walks the parsed JSON tree replacing `${env.VAR}` tokens in every string
/// leaf with the value of `VAR` from the process environment. A field whose
/// value references a variable that doesn't exist, or whose substituted
/// value is empty, becomes `null` so the field's `#[serde(default)]` takes
/// over instead (spec.md §6: "non-existent variables fall back to
/// defaults; empty strings become null").
fn substitute_env_value(value: &mut Value) {
    match value {
        Value::String(s) => match substitute_env_str(s) {
            Some(substituted) if !substituted.is_empty() => *s = substituted,
            _ => *value = Value::Null,
        },
        Value::Array(items) => items.iter_mut().for_each(substitute_env_value),
        Value::Object(map) => map.values_mut().for_each(substitute_env_value),
        _ => {}
    }
}

/// Returns `None` if any `${env.VAR}` token in `raw` references a variable
/// that isn't set.
fn substitute_env_str(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${env.") {
        out.push_str(&rest[..start]);
        let after = &rest[start + "${env.".len()..];
        let end = after.find('}')?;
        let var_name = &after[..end];
        out.push_str(&std::env::var(var_name).ok()?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn parse_engine(raw: &str) -> Result<DbEngineKind, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "postgresql" | "postgres" => Ok(DbEngineKind::Postgres),
        "sqlite" => Ok(DbEngineKind::Sqlite),
        "mysql" | "mariadb" => Ok(DbEngineKind::MySql),
        "db2" => Ok(DbEngineKind::Db2),
        other => Err(ConfigError::UnknownEngine(other.to_string())),
    }
}

/// Builds the engine-native connection string for one configured database.
pub fn connection_string(conn: &ConnectionFile, kind: DbEngineKind) -> String {
    let host = conn.host.as_deref().unwrap_or("");
    let database = conn.database.as_deref().unwrap_or("");
    let user = conn.user.as_deref().unwrap_or("");
    let password = conn.password.as_deref().unwrap_or("");

    match kind {
        DbEngineKind::Sqlite => conn.path.clone().unwrap_or_else(|| format!("{}.sqlite3", conn.name)),
        DbEngineKind::Postgres => format!("postgres://{user}:{password}@{host}:{}/{database}", conn.port.unwrap_or(5432)),
        DbEngineKind::MySql => format!("mysql://{user}:{password}@{host}:{}/{database}", conn.port.unwrap_or(3306)),
        DbEngineKind::Db2 => format!(
            "Driver={{IBM DB2 ODBC DRIVER}};Hostname={host};Port={};Database={database};Uid={user};Pwd={password};",
            conn.port.unwrap_or(50000),
        ),
    }
}

pub fn tag_limits(queues: &HashMap<String, QueueLimitsFile>, default_min: usize) -> HashMap<QueueKind, TagLimits> {
    let mut limits = HashMap::new();
    for tag in [QueueKind::Slow, QueueKind::Medium, QueueKind::Fast, QueueKind::Cache] {
        let configured = queues.get(tag.label());
        let min = configured.map(|q| q.min).unwrap_or(default_min);
        let max = configured.map(|q| q.max).unwrap_or(default_min.max(1));
        limits.insert(tag, TagLimits { min, max });
    }
    limits
}

pub fn build_connection_config(conn: &ConnectionFile) -> Result<ConnectionConfig, ConfigError> {
    let kind = parse_engine(&conn.engine)?;
    Ok(ConnectionConfig {
        kind,
        connection_string: connection_string(conn, kind),
        max_connections: None,
        min_connections: None,
        acquire_timeout_seconds: None,
        connect_retry_backoff_ms: None,
    })
}
