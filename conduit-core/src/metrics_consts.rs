//! Metric name constants shared across modules, kept in one place so a
//! Prometheus dashboard can be written against stable names.

pub const QTC_LOOKUPS_TOTAL: &str = "conduit_qtc_lookups_total";
pub const QTC_ENTRIES: &str = "conduit_qtc_entries";
pub const QUERIES_PROCESSED_TOTAL: &str = "conduit_queries_processed_total";
pub const QUEUE_DEPTH: &str = "conduit_queue_depth";
pub const REQUEST_DURATION_SECONDS: &str = "conduit_request_duration_seconds";
