//! Prometheus exposition for the gateway's own HTTP surface. Request-level
//! metrics here; per-query metrics (`conduit_queries_processed_total`,
//! `conduit_queue_depth`, ...) are recorded in `conduit-core`.

use std::time::Instant;

use axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Adds `/metrics` and wraps the router with the request-duration
/// middleware. Call this last, after every other route is mounted.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();
    router
        .route("/metrics", get(move || std::future::ready(recorder_handle.render())))
        .layer(axum::middleware::from_fn(track_metrics))
}

fn setup_metrics_recorder() -> PrometheusHandle {
    const BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .expect("static bucket list is valid")
        .install_recorder()
        .expect("no other recorder installed yet")
}

async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let labels = [("method", method.to_string()), ("path", path), ("status", status)];

    metrics::counter!("conduit_http_requests_total", &labels).increment(1);
    metrics::histogram!(conduit_core::metrics_consts::REQUEST_DURATION_SECONDS, &labels).record(latency);

    response
}
