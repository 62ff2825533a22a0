//! DQM: Lead + child queue hierarchy (spec.md §4.5). [`lead`] owns the
//! per-database control plane; [`manager`] is the process-wide directory of
//! Leads. This module holds what both share: the worker loop every queue
//! (Lead or child) runs, and the scale-notification channel children use to
//! tell their Lead about load without reaching into its state directly.

pub mod lead;
pub mod manager;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::queue::QueueWorker;
use crate::tags::QueueKind;
use crate::types::QueryResult;

/// Sent by a worker after it submits or finishes an item, decoupling the
/// child from the Lead's scaling decisions (spec.md §9's "bounded channel
/// owned by Lead" resolution of the cyclic-reference pattern).
#[derive(Debug, Clone, Copy)]
pub enum ScaleEvent {
    Submitted(QueueKind),
    Completed(QueueKind),
}

/// Builds the structured label spec.md §4.5 requires on every log line:
/// `DQM-<Database>-<NN>-<Tags>`.
pub fn label(database: &str, queue_number: u8, tags: crate::tags::Tags) -> String {
    format!("DQM-{database}-{queue_number:02}-{}", tags.label())
}

/// The loop every queue worker (Lead's own queue and every child) runs:
/// pull a `WorkItem`, execute it against the exclusively-owned engine
/// handle, signal the waiter, tell the Lead the tag went idle again.
///
/// Connection-loss handling (spec.md §4.5 "Failure semantics"): one
/// `reset_connection` + retry before the item is failed with
/// `ConnectionLost` and the loop moves on.
pub async fn run_worker(
    log_label: String,
    mut engine: Box<dyn Engine>,
    mut queue: QueueWorker,
    tag: QueueKind,
    scale_tx: mpsc::Sender<ScaleEvent>,
    processed: Arc<AtomicU64>,
) {
    info!(queue = %log_label, "worker started");
    while let Some(item) = queue.recv().await {
        let mut result = engine.execute_query(&item.request.sql, &item.request.bindings).await;

        if result.is_err() {
            warn!(queue = %log_label, query_id = %item.query_id, "execute failed, resetting connection and retrying once");
            if engine.reset_connection().await.is_ok() {
                result = engine.execute_query(&item.request.sql, &item.request.bindings).await;
            }
        }

        let query_result = match result {
            Ok(r) => r,
            Err(e) => QueryResult::failed(e.to_string()),
        };

        processed.fetch_add(1, Ordering::Relaxed);
        drop(item.result_tx.send(query_result));
        let _ = scale_tx.send(ScaleEvent::Completed(tag)).await;
    }
    info!(queue = %log_label, "worker stopped, queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::Tags;

    #[test]
    fn label_matches_spec_format() {
        assert_eq!(label("Acuranzo", 0, Tags::LEAD | Tags::MEDIUM | Tags::CACHE), "DQM-Acuranzo-00-LMC");
        assert_eq!(label("Acuranzo", 1, Tags::FAST), "DQM-Acuranzo-01-F");
    }
}
