//! Error taxonomy for the gateway, grouped by the stage of the request
//! pipeline that raises them (spec.md §7). Grouping by origin, rather than
//! one flat enum, mirrors how `cyclotron-core::error` splits `QueueError`
//! from `JobError` by where in the stack an error can occur.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid method")]
    InvalidMethod,
    #[error("invalid JSON body")]
    InvalidJson,
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(String),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("database not found: {0}")]
    DatabaseNotFound(String),
    #[error("query not found: {0}")]
    QueryNotFound(i32),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParameterError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("unused parameter: {0}")]
    UnusedParameter(String),
    #[error("parameter type mismatch: {name} (expected {expected}, got {actual})")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("too many parameters: limit is {limit}")]
    TooManyParameters { limit: usize },
}

#[derive(Debug, Error)]
pub enum QueueingError {
    #[error("no queue available for database {database} tag hint {tag_hint:?}")]
    NoQueueAvailable { database: String, tag_hint: String },
    #[error("queue is full")]
    QueueFull,
    #[error("queue manager is shutting down")]
    ShuttingDown,
    #[error("duplicate query id: {0}")]
    DuplicateQueryId(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("bootstrap for database {0} has not completed")]
    BootstrapNotComplete(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error("driver error: {0}")]
    DriverError(String),
    #[error("query execution timeout")]
    Timeout,
}

/// Top-level error returned by `conduit-core`'s request pipeline. One
/// variant per error group above, plus the internal catch-alls from
/// spec.md §7's "Internal" category.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Queueing(#[from] QueueingError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("allocation failure")]
    AllocationFailure,
    #[error("unknown pending result id: {0}")]
    UnknownPendingId(Uuid),
}

/// Errors raised by an engine implementation (spec.md §4.1 "Error conditions").
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("bind count mismatch: expected {expected}, got {actual}")]
    BindCountMismatch { expected: usize, actual: usize },
    #[error("invalid sql: {0}")]
    InvalidSql(String),
}

impl From<EngineError> for ExecutionError {
    fn from(e: EngineError) -> Self {
        ExecutionError::DriverError(e.to_string())
    }
}
