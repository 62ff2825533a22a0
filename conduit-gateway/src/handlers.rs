//! HTTP surface for the request pipeline (spec.md §6): a single query
//! endpoint, reachable by `POST` with a JSON body or `GET` with the same
//! fields as query parameters, plus the `GatewayError` → status code table.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use conduit_core::error::{ExecutionError, GatewayError, InputError, LookupError, ParameterError, QueueingError};
use conduit_core::{process_request, ConduitRequest};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub database: String,
    pub query_ref: i32,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub queue_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub database: String,
    pub query_ref: i32,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub queue_tag: Option<String>,
}

pub async fn query_post(State(state): State<AppState>, Json(body): Json<QueryBody>) -> Response {
    let request = ConduitRequest {
        database_name: body.database,
        query_ref: body.query_ref,
        params: body.params,
        queue_tag_override: body.queue_tag,
    };
    run(state, request).await
}

pub async fn query_get(State(state): State<AppState>, Query(params): Query<QueryParams>) -> Response {
    let parsed_params = match params.params {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(_) => return error_response(&GatewayError::Input(InputError::InvalidJson), None, None),
        },
        None => json!({}),
    };
    let request = ConduitRequest {
        database_name: params.database,
        query_ref: params.query_ref,
        params: parsed_params,
        queue_tag_override: params.queue_tag,
    };
    run(state, request).await
}

async fn run(state: AppState, request: ConduitRequest) -> Response {
    let database = request.database_name.clone();
    let query_ref = request.query_ref;

    match process_request(&state.manager, request).await {
        Ok(response) => {
            let status = if response.success { StatusCode::OK } else { status_for_response(&response) };
            (status, Json(response)).into_response()
        }
        Err(e) => error_response(&e, Some(&database), Some(query_ref)),
    }
}

/// A response record with `success=false` still carries a distinct HTTP
/// status depending on which failure branch `process_request` took.
fn status_for_response(response: &conduit_core::ConduitResponse) -> StatusCode {
    match response.error.as_deref() {
        Some("Query execution timeout") => StatusCode::REQUEST_TIMEOUT,
        Some("Database error") => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::OK,
    }
}

fn error_response(err: &GatewayError, database: Option<&str>, query_ref: Option<i32>) -> Response {
    let status = status_for_error(err);
    let mut body = json!({
        "success": false,
        "error": err.to_string(),
    });
    if let (Value::Object(map), Some(db)) = (&mut body, database) {
        map.insert("database".to_string(), json!(db));
    }
    if let (Value::Object(map), Some(q)) = (&mut body, query_ref) {
        map.insert("query_ref".to_string(), json!(q));
    }
    (status, Json(body)).into_response()
}

fn status_for_error(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Input(InputError::InvalidMethod) => StatusCode::METHOD_NOT_ALLOWED,
        GatewayError::Input(_) => StatusCode::BAD_REQUEST,
        GatewayError::Lookup(LookupError::DatabaseNotFound(_)) => StatusCode::NOT_FOUND,
        GatewayError::Lookup(LookupError::QueryNotFound(_)) => StatusCode::NOT_FOUND,
        GatewayError::Parameter(ParameterError::MissingParameter(_))
        | GatewayError::Parameter(ParameterError::UnusedParameter(_))
        | GatewayError::Parameter(ParameterError::TypeMismatch { .. })
        | GatewayError::Parameter(ParameterError::TooManyParameters { .. }) => StatusCode::BAD_REQUEST,
        GatewayError::Queueing(QueueingError::NoQueueAvailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Queueing(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Execution(ExecutionError::BootstrapNotComplete(_)) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Execution(ExecutionError::Timeout) => StatusCode::REQUEST_TIMEOUT,
        GatewayError::Execution(ExecutionError::DriverError(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Execution(ExecutionError::ConnectionLost) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::AllocationFailure | GatewayError::UnknownPendingId(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
