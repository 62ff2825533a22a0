mod config;
mod handlers;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use common_health::HealthRegistry;
use conduit_core::dqm::lead::LeadConfig;
use conduit_core::GatewayManager;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

/// Parameter payloads are small JSON objects; this is generous enough for
/// any realistic bound-parameter set while keeping a misbehaving client
/// from holding a worker's body-read loop open indefinitely.
const MAX_REQUEST_BODY_BYTES: usize = 1_000_000;

#[derive(Clone)]
pub struct AppState {
    manager: Arc<GatewayManager>,
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await.wrap_err_with(|| format!("binding {bind}"))?;
    info!(bind = %bind, "conduit-gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn app(state: AppState, readiness: HealthRegistry) -> Router {
    Router::new()
        .route(
            "/api/conduit/query",
            post(handlers::query_post)
                .get(handlers::query_get)
                .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES)),
        )
        .route("/_readiness", get(move || std::future::ready(readiness.get_status())))
        .route("/_liveness", get(|| std::future::ready(axum::http::StatusCode::OK)))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let process_config = config::ProcessConfig::init_from_env().wrap_err("failed to load process configuration")?;
    let bind = process_config.bind();

    let databases_file = config::load_databases_file(std::path::Path::new(&process_config.databases_config_path))
        .wrap_err("failed to load database configuration")?;

    let readiness = HealthRegistry::new("readiness");
    let manager = Arc::new(GatewayManager::new());

    for conn in &databases_file.databases.connections {
        if !conn.enabled {
            info!(database = %conn.name, "database disabled in config, skipping");
            continue;
        }

        let connection = config::build_connection_config(conn).wrap_err_with(|| format!("database {}", conn.name))?;
        let limits = config::tag_limits(&conn.queues, databases_file.databases.default_workers);

        let lead_config = LeadConfig {
            database_name: conn.name.clone(),
            connection,
            bootstrap_query: conn.bootstrap_query.clone(),
            heartbeat_interval: Duration::from_secs(databases_file.databases.heartbeat_interval_seconds),
            max_child_queues: databases_file.databases.max_child_queues,
            queue_capacity: 256,
            limits,
        };

        match manager.add_database(lead_config).await {
            Ok(()) => {
                let handle = readiness
                    .register(format!("lead-{}", conn.name), Duration::from_secs(databases_file.databases.heartbeat_interval_seconds * 4))
                    .await;
                handle.report_healthy().await;
                info!(database = %conn.name, "database launched");
            }
            Err(e) => {
                error!(database = %conn.name, error = %e, "failed to launch database, continuing without it");
            }
        }
    }

    if manager.database_names().await.is_empty() {
        warn!("no databases launched, gateway will reject every request with DatabaseNotFound");
    }

    let state = AppState { manager: manager.clone() };
    let router = metrics::setup_metrics_routes(app(state, readiness));

    let http_server = tokio::spawn(listen(router, bind));

    let result = http_server.await;
    manager.shutdown_all().await;

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(eyre::eyre!("http server task panicked: {e}")),
    }
}
