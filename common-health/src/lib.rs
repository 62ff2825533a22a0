//! Shared liveness/readiness bookkeeping for conduit processes.
//!
//! `conduit-gateway` runs several independent loops — one per database
//! Lead's heartbeat, one per child queue worker, the HTTP listener itself —
//! and the process should only be reported healthy once every one of them
//! is alive and making progress. `HealthRegistry` lets any number of
//! components register and report their own status; the registry's overall
//! status is the aggregate, combined according to a configurable strategy.
//!
//! Liveness and readiness are kept as separate registry instances rather
//! than a single shared state, since conflating the two k8s probe concepts
//! tends to produce confusing failure modes.

use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::runtime;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// True only if every registered component currently satisfies the registry's strategy.
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set when a component first registers, before its first report.
    Starting,
    /// Healthy until the given deadline; must be refreshed before it passes.
    HealthyUntil(time::OffsetDateTime),
    Unhealthy,
    /// The deadline in a prior `HealthyUntil` passed without a fresh report.
    Stalled,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => until.gt(&time::OffsetDateTime::now_utc()),
            _ => false,
        }
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Report healthy for another `deadline` worth of time. Must be called more
    /// often than `deadline` or the registry will consider this component stalled.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report health status: {}", err)
        }
    }

    /// Non-async variant for call sites inside a worker loop that can't await, e.g.
    /// a `DatabaseQueue` worker task between blocking engine calls.
    pub fn report_healthy_blocking(&self) {
        self.report_status_blocking(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_status_blocking(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Ok(handle) = runtime::Handle::try_current() {
            let owned = self.clone();
            handle.spawn(async move { owned.report_status(message.status).await });
        } else if let Err(err) = self.sender.blocking_send(message) {
            warn!("failed to report health status: {}", err)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HealthStrategy {
    /// Every registered component must be healthy.
    All,
    /// At least one registered component must be healthy.
    Any,
}

impl std::str::FromStr for HealthStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "all" => Ok(HealthStrategy::All),
            "any" => Ok(HealthStrategy::Any),
            other => Err(format!("unknown health strategy: {other}, must be ALL or ANY")),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    strategy: HealthStrategy,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self::new_with_strategy(name, HealthStrategy::All)
    }

    pub fn new_with_strategy(name: &str, strategy: HealthStrategy) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(32);
        let registry = Self {
            name: name.to_owned(),
            strategy,
            components: Default::default(),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match components.write() {
                    Ok(mut map) => {
                        map.insert(message.component, message.status);
                    }
                    Err(_) => warn!("poisoned HealthRegistry mutex"),
                }
            }
        });

        registry
    }

    pub async fn register<D>(&self, component: String, deadline: D) -> HealthHandle
    where
        D: TryInto<Duration>,
    {
        let Ok(deadline) = deadline.try_into() else {
            panic!("invalid health deadline for component {component}")
        };
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Computes the aggregate status. Usable directly as an axum handler via `IntoResponse`.
    pub fn get_status(&self) -> HealthStatus {
        let components = self
            .components
            .read()
            .expect("poisoned HealthRegistry mutex");

        let base = HealthStatus {
            healthy: !components.is_empty() && self.strategy == HealthStrategy::All,
            components: Default::default(),
        };
        let now = time::OffsetDateTime::now_utc();

        let result = components.iter().fold(base, |mut acc, (name, status)| {
            match status {
                ComponentStatus::HealthyUntil(until) if until.gt(&now) => {
                    if self.strategy == HealthStrategy::Any {
                        acc.healthy = true;
                    }
                    acc.components.insert(name.clone(), status.clone());
                }
                ComponentStatus::HealthyUntil(_) => {
                    if self.strategy == HealthStrategy::All {
                        acc.healthy = false;
                    }
                    acc.components.insert(name.clone(), ComponentStatus::Stalled);
                }
                _ => {
                    if self.strategy == HealthStrategy::All {
                        acc.healthy = false;
                    }
                    acc.components.insert(name.clone(), status.clone());
                }
            }
            acc
        });

        match result.healthy {
            true => info!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, result.components),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Sub;
    use time::{Duration, OffsetDateTime};

    async fn eventually<F: Fn() -> bool>(check: F) {
        let deadline = OffsetDateTime::now_utc().add(Duration::seconds(5));
        while !check() && OffsetDateTime::now_utc().lt(&deadline) {
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
        assert!(check())
    }

    #[tokio::test]
    async fn starts_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn single_component_lifecycle() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("lead-acz".into(), Duration::seconds(30)).await;
        eventually(|| registry.get_status().components.len() == 1).await;
        assert_eq!(
            registry.get_status().components.get("lead-acz"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy().await;
        eventually(|| registry.get_status().healthy).await;

        handle.report_status(ComponentStatus::Unhealthy).await;
        eventually(|| !registry.get_status().healthy).await;
    }

    #[tokio::test]
    async fn stale_component_is_reported_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("lead-acz".into(), Duration::seconds(30)).await;
        handle.report_healthy().await;
        eventually(|| registry.get_status().healthy).await;

        handle
            .report_status(ComponentStatus::HealthyUntil(
                OffsetDateTime::now_utc().sub(Duration::seconds(1)),
            ))
            .await;
        eventually(|| !registry.get_status().healthy).await;
        assert_eq!(
            registry.get_status().components.get("lead-acz"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[tokio::test]
    async fn any_strategy_needs_one_healthy_component() {
        let registry = HealthRegistry::new_with_strategy("liveness", HealthStrategy::Any);
        let lead1 = registry.register("lead-acz".into(), Duration::seconds(30)).await;
        let lead2 = registry.register("lead-billing".into(), Duration::seconds(30)).await;
        eventually(|| registry.get_status().components.len() == 2).await;
        assert!(!registry.get_status().healthy);

        lead1.report_healthy().await;
        eventually(|| registry.get_status().healthy).await;

        lead2.report_status(ComponentStatus::Unhealthy).await;
        eventually(|| registry.get_status().healthy).await;

        lead1.report_status(ComponentStatus::Unhealthy).await;
        eventually(|| !registry.get_status().healthy).await;
    }

    #[test]
    fn health_strategy_parses_case_insensitively() {
        assert_eq!("ALL".parse::<HealthStrategy>().unwrap(), HealthStrategy::All);
        assert_eq!("any".parse::<HealthStrategy>().unwrap(), HealthStrategy::Any);
        assert!("bogus".parse::<HealthStrategy>().is_err());
    }

    #[test]
    fn into_response_maps_status_code() {
        let unhealthy = HealthStatus::default().into_response();
        assert_eq!(unhealthy.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let healthy = HealthStatus {
            healthy: true,
            components: Default::default(),
        }
        .into_response();
        assert_eq!(healthy.status(), StatusCode::OK);
    }
}
