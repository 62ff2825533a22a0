//! Core data model (spec.md §3): cache entries, typed parameters, the
//! request/result pair that crosses the worker boundary, and the
//! connection handle each queue worker owns exclusively.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::tags::QueueKind;

/// An immutable-after-insertion row of the Query Table Cache.
#[derive(Debug)]
pub struct QueryCacheEntry {
    pub query_ref: i32,
    pub sql_template: String,
    pub description: String,
    pub queue_type_hint: QueueKind,
    pub timeout_seconds: u64,
    /// Monotonic "last accessed" marker, relaxed atomics per spec.md §4.2.
    last_used_millis: AtomicU64,
    usage_count: AtomicU64,
    created_at: Instant,
}

impl QueryCacheEntry {
    pub fn new(
        query_ref: i32,
        sql_template: String,
        description: String,
        queue_type_hint: QueueKind,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            query_ref,
            sql_template,
            description,
            queue_type_hint,
            timeout_seconds,
            last_used_millis: AtomicU64::new(0),
            usage_count: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Updates `last_used` and increments `usage_count`. Ordering is relaxed:
    /// spec.md §4.2 explicitly says exact ordering is not required here.
    pub fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_used_millis.store(elapsed, Ordering::Relaxed);
        self.usage_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }
}

/// A named, typed value supplied by a client (spec.md §3 `TypedParameter`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum TypedValue {
    Integer(i64),
    String(String),
    Boolean(bool),
    Float(f64),
}

impl TypedValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            TypedValue::Integer(_) => "INTEGER",
            TypedValue::String(_) => "STRING",
            TypedValue::Boolean(_) => "BOOLEAN",
            TypedValue::Float(_) => "FLOAT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedParameter {
    pub name: String,
    pub value: TypedValue,
}

pub type ParameterList = Vec<TypedParameter>;

/// Final, ready-to-execute form of a request: SQL with placeholders already
/// rewritten to the engine's native style, and the ordered bindings to match.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    pub bindings: ParameterList,
    pub queue_hint: QueueKind,
    pub timeout_seconds: u64,
}

/// What a worker produces after running a `QueryRequest` through the engine
/// interface (spec.md §3 `QueryResult`).
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub success: bool,
    /// JSON-array-of-objects text, one object per row, column names as keys.
    pub rows_json: String,
    pub row_count: u64,
    pub column_count: u32,
    pub column_names: Option<Vec<String>>,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    pub affected_rows: u64,
}

impl QueryResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            rows_json: "[]".to_string(),
            row_count: 0,
            column_count: 0,
            column_names: None,
            error_message: Some(message.into()),
            execution_time_ms: 0,
            affected_rows: 0,
        }
    }
}

/// Lifecycle state of a `DatabaseHandle` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Error,
    Disconnected,
}

/// Unique, process-lifetime-stable identifier for a rendezvous slot
/// (spec.md §4.7 `query_id` generation: prefix + monotonic counter + time).
pub fn generate_query_id(prefix: &str) -> String {
    static COUNTER: AtomicI64 = AtomicI64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let micros = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    format!("{prefix}-{seq}-{micros}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_id_generation_is_unique_within_process() {
        let a = generate_query_id("q");
        let b = generate_query_id("q");
        assert_ne!(a, b);
    }

    #[test]
    fn cache_entry_touch_increments_usage_count() {
        let entry = QueryCacheEntry::new(1, "SELECT 1".into(), "ping".into(), QueueKind::Fast, 30);
        assert_eq!(entry.usage_count(), 0);
        entry.touch();
        entry.touch();
        assert_eq!(entry.usage_count(), 2);
    }
}
