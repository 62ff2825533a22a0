//! Conduit API Core (spec.md §4.8): the function every HTTP handler calls.
//! Takes a parsed request record, drives lookup → parameter processing →
//! selection → submit → wait, and returns a response record ready for the
//! HTTP layer to serialize and pick a status code for (spec.md §6).

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::dqm::manager::GatewayManager;
use crate::error::{ExecutionError, GatewayError, LookupError};
use crate::params;
use crate::tags::QueueKind;
use crate::types::QueryRequest;

/// Inputs parsed upstream by the HTTP layer (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct ConduitRequest {
    pub database_name: String,
    pub query_ref: i32,
    pub params: Value,
    pub queue_tag_override: Option<String>,
}

/// The response record the HTTP layer serializes (spec.md §4.8 step 8).
#[derive(Debug, Serialize)]
pub struct ConduitResponse {
    pub success: bool,
    pub query_ref: i32,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_error: Option<String>,
}

impl ConduitResponse {
    fn base(database: &str, query_ref: i32) -> Self {
        Self {
            success: false,
            query_ref,
            database: database.to_string(),
            description: None,
            rows: None,
            row_count: None,
            column_count: None,
            execution_time_ms: None,
            queue_used: None,
            error: None,
            timeout_seconds: None,
            database_error: None,
        }
    }
}

/// Runs the full request pipeline. Returns `Ok` with a response record for
/// every outcome spec.md §4.8 defines as a response (including logical
/// failures like `QueryNotFound`); only truly unrecoverable conditions
/// surface as `Err`.
pub async fn process_request(manager: &GatewayManager, request: ConduitRequest) -> Result<ConduitResponse, GatewayError> {
    // Step 1: database lookup.
    let lead = manager.lookup(&request.database_name).await?;

    // Step 2: cache lookup.
    let entry = lead
        .qtc()
        .lookup(request.query_ref)
        .await
        .ok_or_else(|| GatewayError::Lookup(LookupError::QueryNotFound(request.query_ref)))?;

    // Step 3: parameter processing.
    let typed_params = params::parse_typed_json(&request.params)?;
    let style = lead.engine_kind().placeholder_style();
    let (sql, bindings) = params::rewrite(&entry.sql_template, &typed_params, style)?;

    // Step 4: queue selection input (tag override or cache hint).
    let tag_hint: QueueKind = match &request.queue_tag_override {
        Some(raw) => raw.parse().map_err(|_| GatewayError::Queueing(crate::error::QueueingError::NoQueueAvailable {
            database: request.database_name.clone(),
            tag_hint: raw.clone(),
        }))?,
        None => entry.queue_type_hint,
    };

    let query_request = QueryRequest {
        sql,
        bindings,
        queue_hint: tag_hint,
        timeout_seconds: entry.timeout_seconds,
    };

    // Steps 5-6: register pending slot, submit.
    let pending = lead.submit(tag_hint, query_request).await?;

    // Step 7: wait.
    let timeout = Duration::from_secs(entry.timeout_seconds);
    let mut response = ConduitResponse::base(&request.database_name, request.query_ref);

    match pending.wait(timeout).await {
        Ok(result) if result.success => {
            response.success = true;
            response.description = Some(entry.description.clone());
            response.rows = serde_json::from_str(&result.rows_json).ok();
            response.row_count = Some(result.row_count);
            response.column_count = Some(result.column_count);
            response.execution_time_ms = Some(result.execution_time_ms);
            response.queue_used = Some(tag_hint.label().to_string());
        }
        Ok(result) => {
            response.error = Some("Database error".to_string());
            response.database_error = result.error_message;
            response.queue_used = Some(tag_hint.label().to_string());
        }
        Err(GatewayError::Execution(ExecutionError::Timeout)) => {
            response.error = Some("Query execution timeout".to_string());
            response.timeout_seconds = Some(entry.timeout_seconds);
        }
        Err(e) => return Err(e),
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_database_surfaces_as_lookup_error() {
        let manager = GatewayManager::new();
        let err = process_request(
            &manager,
            ConduitRequest {
                database_name: "missing".into(),
                query_ref: 1,
                params: serde_json::json!({}),
                queue_tag_override: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Lookup(LookupError::DatabaseNotFound(_))));
    }
}
