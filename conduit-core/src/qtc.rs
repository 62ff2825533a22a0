//! Query Table Cache (spec.md §4.2): an in-memory, read-heavy map from
//! `query_ref` to its SQL template and metadata, swapped atomically on
//! bootstrap/reload so concurrent readers never observe a partial state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::metrics_consts::{QTC_ENTRIES, QTC_LOOKUPS_TOTAL};
use crate::tags::QueueKind;
use crate::types::QueryCacheEntry;

/// One row as returned, in order, by the bootstrap query: `query_ref,
/// sql_template, description, queue_type, timeout_seconds` — the canonical
/// schema chosen in SPEC_FULL.md §4 to resolve an open question about
/// the bootstrap row shape.
#[derive(Debug, Clone)]
pub struct BootstrapRow {
    pub query_ref: i32,
    pub sql_template: String,
    pub description: String,
    pub queue_type: String,
    pub timeout_seconds: u64,
}

pub struct QueryTableCache {
    entries: RwLock<HashMap<i32, Arc<QueryCacheEntry>>>,
}

impl Default for QueryTableCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryTableCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// O(1) lookup by `query_ref`. Touches the entry's usage counters on hit.
    pub async fn lookup(&self, query_ref: i32) -> Option<Arc<QueryCacheEntry>> {
        let entries = self.entries.read().await;
        let entry = entries.get(&query_ref).cloned();
        if let Some(entry) = &entry {
            entry.touch();
            metrics::counter!(QTC_LOOKUPS_TOTAL, "result" => "hit").increment(1);
        } else {
            metrics::counter!(QTC_LOOKUPS_TOTAL, "result" => "miss").increment(1);
        }
        entry
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Builds a fresh cache from bootstrap rows and swaps it in under the
    /// write lock. Rows with a duplicate `query_ref` are rejected and
    /// logged rather than failing the whole bootstrap.
    pub async fn bootstrap(&self, rows: Vec<BootstrapRow>) -> Result<(), BootstrapError> {
        let mut built = HashMap::with_capacity(rows.len());
        for row in rows {
            let queue_type_hint: QueueKind = row.queue_type.parse().map_err(BootstrapError::InvalidQueueType)?;
            if built.contains_key(&row.query_ref) {
                warn!(query_ref = row.query_ref, "duplicate query_ref in bootstrap rows, rejecting");
                continue;
            }
            built.insert(
                row.query_ref,
                Arc::new(QueryCacheEntry::new(
                    row.query_ref,
                    row.sql_template,
                    row.description,
                    queue_type_hint,
                    row.timeout_seconds,
                )),
            );
        }

        let count = built.len();
        let mut guard = self.entries.write().await;
        *guard = built;
        drop(guard);
        metrics::gauge!(QTC_ENTRIES).set(count as f64);
        Ok(())
    }

    /// Alias kept for call sites that trigger a reload rather than the
    /// initial bootstrap; the mechanics (build-then-swap) are identical.
    pub async fn reload(&self, rows: Vec<BootstrapRow>) -> Result<(), BootstrapError> {
        self.bootstrap(rows).await
    }
}

impl BootstrapRow {
    /// Parses the `rows_json` an engine returns for the bootstrap query
    /// into typed rows, reading the canonical column order chosen in
    /// SPEC_FULL.md §4: `query_ref, sql_template, description, queue_type,
    /// timeout_seconds`.
    pub fn parse_rows_json(rows_json: &str) -> Result<Vec<BootstrapRow>, BootstrapError> {
        let value: serde_json::Value = serde_json::from_str(rows_json).map_err(|e| BootstrapError::Malformed(e.to_string()))?;
        let array = value.as_array().ok_or_else(|| BootstrapError::Malformed("expected a JSON array of rows".into()))?;

        array
            .iter()
            .map(|row| {
                let get_str = |key: &str| -> Result<String, BootstrapError> {
                    row.get(key)
                        .and_then(|v| v.as_str().map(str::to_owned).or_else(|| v.as_i64().map(|n| n.to_string())))
                        .ok_or_else(|| BootstrapError::Malformed(format!("missing or non-scalar column: {key}")))
                };
                let query_ref = row
                    .get("query_ref")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| BootstrapError::Malformed("missing query_ref".into()))? as i32;
                let timeout_seconds = row
                    .get("timeout_seconds")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| BootstrapError::Malformed("missing timeout_seconds".into()))?;

                Ok(BootstrapRow {
                    query_ref,
                    sql_template: get_str("sql_template")?,
                    description: get_str("description")?,
                    queue_type: get_str("queue_type")?,
                    timeout_seconds,
                })
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid queue_type in bootstrap row: {0}")]
    InvalidQueueType(String),
    #[error("malformed bootstrap row: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(query_ref: i32, queue_type: &str) -> BootstrapRow {
        BootstrapRow {
            query_ref,
            sql_template: format!("SELECT {query_ref}"),
            description: "test".into(),
            queue_type: queue_type.into(),
            timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn bootstrap_then_lookup_roundtrips() {
        let qtc = QueryTableCache::new();
        qtc.bootstrap(vec![row(1, "fast")]).await.unwrap();
        let entry = qtc.lookup(1).await.expect("entry present");
        assert_eq!(entry.sql_template, "SELECT 1");
        assert_eq!(entry.usage_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_query_ref_is_rejected_not_fatal() {
        let qtc = QueryTableCache::new();
        qtc.bootstrap(vec![row(1, "fast"), row(1, "slow")]).await.unwrap();
        assert_eq!(qtc.len().await, 1);
    }

    #[tokio::test]
    async fn reload_swaps_atomically() {
        let qtc = QueryTableCache::new();
        qtc.bootstrap(vec![row(1, "fast")]).await.unwrap();
        qtc.reload(vec![row(2, "slow")]).await.unwrap();
        assert!(qtc.lookup(1).await.is_none());
        assert!(qtc.lookup(2).await.is_some());
    }

    #[tokio::test]
    async fn missing_query_ref_is_none() {
        let qtc = QueryTableCache::new();
        assert!(qtc.lookup(999).await.is_none());
    }

    #[test]
    fn parses_bootstrap_rows_in_canonical_column_order() {
        let json = r#"[{"query_ref":1,"sql_template":"SELECT 1 AS x","description":"ping","queue_type":"fast","timeout_seconds":30}]"#;
        let rows = BootstrapRow::parse_rows_json(json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].query_ref, 1);
        assert_eq!(rows[0].queue_type, "fast");
    }

    #[test]
    fn rejects_non_array_payload() {
        let err = BootstrapRow::parse_rows_json(r#"{"not":"an array"}"#).unwrap_err();
        assert!(matches!(err, BootstrapError::Malformed(_)));
    }
}
