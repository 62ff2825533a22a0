//! Lead queue (spec.md §4.5): owns bootstrap, heartbeat-driven reconnect,
//! and the scale-up/down decisions for one database's child queues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::{self, ConnectionConfig};
use crate::error::{ExecutionError, GatewayError};
use crate::qtc::{BootstrapRow, QueryTableCache};
use crate::queue::{self, QueueHandle, WorkItem};
use crate::registry::{self, PendingResult};
use crate::selector::{self, Candidate};
use crate::tags::{QueueKind, Tags};
use crate::types::QueryRequest;

use super::{label, run_worker, ScaleEvent};

#[derive(Debug, Clone, Copy)]
pub struct TagLimits {
    pub min: usize,
    pub max: usize,
}

pub struct LeadConfig {
    pub database_name: String,
    pub connection: ConnectionConfig,
    pub bootstrap_query: String,
    pub heartbeat_interval: Duration,
    pub max_child_queues: usize,
    pub queue_capacity: usize,
    pub limits: HashMap<QueueKind, TagLimits>,
}

struct ChildQueue {
    queue_number: u8,
    tag: QueueKind,
    handle: QueueHandle,
    processed: Arc<AtomicU64>,
}

#[derive(Debug)]
pub struct Lead {
    database_name: String,
    connection: ConnectionConfig,
    limits: HashMap<QueueKind, TagLimits>,
    max_child_queues: usize,
    queue_capacity: usize,
    qtc: Arc<QueryTableCache>,
    own_handle: QueueHandle,
    own_tags: RwLock<Tags>,
    children: RwLock<Vec<ChildQueue>>,
    scale_tx: mpsc::Sender<ScaleEvent>,
    bootstrap_completed: AtomicBool,
    is_connected: AtomicBool,
    total_queries_processed: Arc<AtomicU64>,
    reconnect_attempts: AtomicU32,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    scale_manager_handle: Mutex<Option<JoinHandle<()>>>,
}

const ALL_DELEGABLE: [QueueKind; 4] = [QueueKind::Slow, QueueKind::Medium, QueueKind::Fast, QueueKind::Cache];

impl Lead {
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn qtc(&self) -> &Arc<QueryTableCache> {
        &self.qtc
    }

    pub fn engine_kind(&self) -> crate::engine::DbEngineKind {
        self.connection.kind
    }

    pub fn bootstrap_completed(&self) -> bool {
        self.bootstrap_completed.load(Ordering::Relaxed)
    }

    /// Runs the full launch sequence (spec.md §4.5 steps 1-5) and returns a
    /// live `Lead` with its own worker, scale manager, and minimum children
    /// for every delegable tag already running.
    pub async fn launch(config: LeadConfig) -> Result<Arc<Self>, GatewayError> {
        let (own_handle, own_worker) = queue::bounded(config.queue_capacity);
        let (scale_tx, scale_rx) = mpsc::channel(256);

        let lead = Arc::new(Lead {
            database_name: config.database_name.clone(),
            connection: config.connection.clone(),
            limits: config.limits.clone(),
            max_child_queues: config.max_child_queues,
            queue_capacity: config.queue_capacity,
            qtc: Arc::new(QueryTableCache::new()),
            own_handle,
            own_tags: RwLock::new(Tags::LEAD | Tags::DELEGABLE),
            children: RwLock::new(Vec::new()),
            scale_tx,
            bootstrap_completed: AtomicBool::new(false),
            is_connected: AtomicBool::new(false),
            total_queries_processed: Arc::new(AtomicU64::new(0)),
            reconnect_attempts: AtomicU32::new(0),
            worker_handle: Mutex::new(None),
            scale_manager_handle: Mutex::new(None),
        });

        let mut engine = engine::connect(&config.connection).await.map_err(ExecutionError::from)?;
        lead.is_connected.store(true, Ordering::Relaxed);

        lead.run_bootstrap(engine.as_mut(), &config.bootstrap_query).await?;

        let worker_handle = tokio::spawn(run_lead_worker(lead.clone(), engine, own_worker, config.heartbeat_interval));
        let scale_manager_handle = tokio::spawn(scale_manager_loop(lead.clone(), scale_rx));
        *lead.worker_handle.lock().await = Some(worker_handle);
        *lead.scale_manager_handle.lock().await = Some(scale_manager_handle);

        for tag in ALL_DELEGABLE {
            let min = lead.limits.get(&tag).map(|l| l.min).unwrap_or(0);
            for _ in 0..min {
                lead.spawn_child(tag).await?;
            }
        }

        info!(database = %lead.database_name, "lead launched");
        Ok(lead)
    }

    async fn run_bootstrap(&self, engine: &mut dyn crate::engine::Engine, bootstrap_query: &str) -> Result<(), GatewayError> {
        let result = engine
            .execute_query(bootstrap_query, &Vec::new())
            .await
            .map_err(|e| GatewayError::Execution(ExecutionError::DriverError(e.to_string())))?;
        let rows = BootstrapRow::parse_rows_json(&result.rows_json)
            .map_err(|e| GatewayError::Execution(ExecutionError::DriverError(e.to_string())))?;
        self.qtc
            .bootstrap(rows)
            .await
            .map_err(|e| GatewayError::Execution(ExecutionError::DriverError(e.to_string())))?;
        self.bootstrap_completed.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Builds a `QueryRequest` pipeline caller into a submitted,
    /// awaitable rendezvous (spec.md §4.8 steps 4-6).
    pub async fn submit(&self, tag_hint: QueueKind, request: QueryRequest) -> Result<PendingResult, GatewayError> {
        if !self.bootstrap_completed() {
            return Err(GatewayError::Execution(ExecutionError::BootstrapNotComplete(self.database_name.clone())));
        }

        let children = self.children.read().await;
        let candidates: Vec<Candidate<'_>> = children
            .iter()
            .map(|c| Candidate { tags: c.tag.as_tag(), queue: &c.handle })
            .collect();
        let chosen = selector::select(&candidates, tag_hint.as_tag(), &self.own_handle).clone();
        drop(children);

        let (query_id, result_tx, pending) = registry::register();
        let item = WorkItem { query_id, request, result_tx };
        chosen.try_submit(item).map_err(GatewayError::Queueing)?;
        let _ = self.scale_tx.send(ScaleEvent::Submitted(tag_hint)).await;
        Ok(pending)
    }

    async fn spawn_child(self: &Arc<Self>, tag: QueueKind) -> Result<(), GatewayError> {
        let mut children = self.children.write().await;
        if children.len() >= self.max_child_queues {
            warn!(database = %self.database_name, "max_child_queues reached, refusing to scale up");
            return Ok(());
        }

        let queue_number = next_free_queue_number(&children);
        let engine = engine::connect(&self.connection).await.map_err(ExecutionError::from)?;
        let (handle, worker) = queue::bounded(self.queue_capacity);
        let processed = Arc::new(AtomicU64::new(0));
        let log_label = label(&self.database_name, queue_number, tag.as_tag());

        tokio::spawn(run_worker(log_label, engine, worker, tag, self.scale_tx.clone(), processed.clone()));

        children.push(ChildQueue { queue_number, tag, handle, processed });
        let became_first = children.iter().filter(|c| c.tag == tag).count() == 1;
        drop(children);

        if became_first {
            let mut own_tags = self.own_tags.write().await;
            own_tags.remove(tag.as_tag());
        }
        Ok(())
    }

    async fn retire_child(&self, tag: QueueKind) {
        let mut children = self.children.write().await;
        let Some(pos) = children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.tag == tag)
            .max_by_key(|(_, c)| c.queue_number)
            .map(|(i, _)| i)
        else {
            return;
        };
        let retired = children.remove(pos);
        let remaining = children.iter().any(|c| c.tag == tag);
        drop(children);
        info!(database = %self.database_name, queue_number = retired.queue_number, "retired idle child queue");

        if !remaining {
            let mut own_tags = self.own_tags.write().await;
            own_tags.insert(tag.as_tag());
        }
    }

    async fn maybe_scale_up(self: &Arc<Self>, tag: QueueKind) {
        let limits = self.limits.get(&tag).copied().unwrap_or(TagLimits { min: 0, max: 0 });
        let children = self.children.read().await;
        let matching: Vec<&ChildQueue> = children.iter().filter(|c| c.tag == tag).collect();
        let count = matching.len();
        // With no children yet, the tag's load sits entirely on the Lead's
        // own queue, so that's what decides whether it's busy.
        let all_busy = if count == 0 {
            self.own_handle.depth() > 0
        } else {
            matching.iter().all(|c| c.handle.depth() > 0)
        };
        drop(children);

        if all_busy && count < limits.max {
            if let Err(e) = self.spawn_child(tag).await {
                error!(database = %self.database_name, error = %e, "failed to scale up");
            }
        }
    }

    async fn maybe_scale_down(&self, tag: QueueKind) {
        let limits = self.limits.get(&tag).copied().unwrap_or(TagLimits { min: 0, max: 0 });
        let children = self.children.read().await;
        let matching: Vec<&ChildQueue> = children.iter().filter(|c| c.tag == tag).collect();
        let count = matching.len();
        let all_idle = count > 0 && matching.iter().all(|c| c.handle.depth() == 0);
        drop(children);

        if all_idle && count > limits.min {
            self.retire_child(tag).await;
        }
    }

    /// Drops every child's queue handle so its worker drains and exits on
    /// its own, then aborts the Lead's own worker and scale-manager tasks
    /// (spec.md §4.5 "Shutdown sequence"). Callers are expected to stop
    /// routing to this Lead first.
    pub async fn shutdown(&self) {
        let mut children = self.children.write().await;
        children.clear();
        drop(children);

        if let Some(handle) = self.worker_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.scale_manager_handle.lock().await.take() {
            handle.abort();
        }
        info!(database = %self.database_name, "lead shutdown: children queues closed, own tasks aborted");
    }

    /// Number of live children currently carrying `tag`, for status
    /// reporting and tests. Not used by the hot submit path, which reads
    /// `children` directly under its own lock.
    pub async fn child_count(&self, tag: QueueKind) -> usize {
        self.children.read().await.iter().filter(|c| c.tag == tag).count()
    }

    pub async fn total_queries_processed(&self) -> u64 {
        let children_total: u64 = self
            .children
            .read()
            .await
            .iter()
            .map(|c| c.processed.load(Ordering::Relaxed))
            .sum();
        children_total + self.total_queries_processed.load(Ordering::Relaxed)
    }
}

fn next_free_queue_number(children: &[ChildQueue]) -> u8 {
    let mut taken: Vec<u8> = children.iter().map(|c| c.queue_number).collect();
    taken.sort_unstable();
    let mut candidate = 1u8;
    for n in taken.drain(..) {
        if n == candidate {
            candidate += 1;
        }
    }
    candidate
}

async fn scale_manager_loop(lead: Arc<Lead>, mut rx: mpsc::Receiver<ScaleEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ScaleEvent::Submitted(tag) => lead.maybe_scale_up(tag).await,
            ScaleEvent::Completed(tag) => lead.maybe_scale_down(tag).await,
        }
    }
}

/// Lead's own worker loop: request processing and the independent
/// heartbeat timer share the Lead's single connection, so they are raced
/// with `select!` rather than run on separate tasks (SPEC_FULL.md §0's
/// resolution of the heartbeat-origin Open Question).
async fn run_lead_worker(
    lead: Arc<Lead>,
    mut engine: Box<dyn crate::engine::Engine>,
    mut worker: queue::QueueWorker,
    heartbeat_interval: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    let log_label = label(&lead.database_name, 0, Tags::LEAD);

    loop {
        tokio::select! {
            item = worker.recv() => {
                let Some(item) = item else {
                    info!(queue = %log_label, "lead worker stopped");
                    break;
                };
                let result = engine.execute_query(&item.request.sql, &item.request.bindings).await;
                let query_result = match result {
                    Ok(r) => r,
                    Err(e) => crate::types::QueryResult::failed(e.to_string()),
                };
                lead.total_queries_processed.fetch_add(1, Ordering::Relaxed);
                drop(item.result_tx.send(query_result));
            }
            _ = ticker.tick() => {
                heartbeat_tick(&lead, engine.as_mut(), &log_label).await;
            }
        }
    }
}

async fn heartbeat_tick(lead: &Arc<Lead>, engine: &mut dyn crate::engine::Engine, log_label: &str) {
    match engine.health_check().await {
        Ok(()) => {
            lead.is_connected.store(true, Ordering::Relaxed);
            lead.reconnect_attempts.store(0, Ordering::Relaxed);
            info!(queue = %log_label, "heartbeat ok");
        }
        Err(e) => {
            lead.is_connected.store(false, Ordering::Relaxed);
            warn!(queue = %log_label, error = %e, "heartbeat failed");
            let attempt = lead.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            let backoff = Duration::from_secs(1u64 << attempt.min(5));
            tokio::time::sleep(backoff).await;
            if let Err(e) = engine.reset_connection().await {
                error!(queue = %log_label, error = %e, "heartbeat reconnect failed");
            } else {
                lead.is_connected.store(true, Ordering::Relaxed);
                lead.reconnect_attempts.store(0, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConnectionConfig, DbEngineKind};
    use crate::queue::WorkItem;
    use crate::types::QueryRequest;

    async fn launch_sqlite_lead(limits: HashMap<QueueKind, TagLimits>) -> Arc<Lead> {
        let config = LeadConfig {
            database_name: "scale_test".to_string(),
            connection: ConnectionConfig {
                kind: DbEngineKind::Sqlite,
                connection_string: "sqlite::memory:".to_string(),
                max_connections: Some(1),
                min_connections: None,
                acquire_timeout_seconds: None,
                connect_retry_backoff_ms: None,
            },
            bootstrap_query: "SELECT 1 AS query_ref, 'SELECT 1' AS sql_template, 'x' AS description, \
                              'fast' AS queue_type, 30 AS timeout_seconds"
                .to_string(),
            heartbeat_interval: Duration::from_secs(3600),
            max_child_queues: 4,
            queue_capacity: 32,
            limits,
        };
        Lead::launch(config).await.expect("lead should launch against in-memory sqlite")
    }

    fn dummy_work_item(tag: QueueKind) -> WorkItem {
        let (result_tx, _result_rx) = tokio::sync::oneshot::channel();
        WorkItem {
            query_id: uuid::Uuid::new_v4(),
            request: QueryRequest {
                sql: "SELECT 1".to_string(),
                bindings: Vec::new(),
                queue_hint: tag,
                timeout_seconds: 30,
            },
            result_tx,
        }
    }

    /// Regression test for the case with no children yet: all of a tag's
    /// load sits on the Lead's own queue, so `maybe_scale_up` must consult
    /// `own_handle`'s depth rather than vacuously concluding "not busy".
    #[tokio::test]
    async fn scale_up_considers_own_backlog_when_no_children_exist() {
        let mut limits = HashMap::new();
        limits.insert(QueueKind::Fast, TagLimits { min: 0, max: 1 });
        let lead = launch_sqlite_lead(limits).await;

        assert_eq!(lead.child_count(QueueKind::Fast).await, 0);

        lead.own_handle.try_submit(dummy_work_item(QueueKind::Fast)).unwrap();
        assert!(lead.own_handle.depth() > 0);

        lead.maybe_scale_up(QueueKind::Fast).await;

        assert_eq!(lead.child_count(QueueKind::Fast).await, 1);
    }

    #[tokio::test]
    async fn scale_up_is_a_noop_once_max_is_reached() {
        let mut limits = HashMap::new();
        limits.insert(QueueKind::Fast, TagLimits { min: 0, max: 0 });
        let lead = launch_sqlite_lead(limits).await;

        lead.own_handle.try_submit(dummy_work_item(QueueKind::Fast)).unwrap();
        lead.maybe_scale_up(QueueKind::Fast).await;

        assert_eq!(lead.child_count(QueueKind::Fast).await, 0);
    }
}
