//! The Queue primitive (spec.md §4.4): a bounded FIFO of `QueryRequest`s
//! fed to exactly one worker task, with a depth counter the Selector reads
//! without taking the channel lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::QueueingError;
use crate::types::QueryRequest;

/// A unit of work submitted to a queue: the rewritten request plus a
/// rendezvous sender the worker uses to hand the result back.
pub struct WorkItem {
    pub query_id: Uuid,
    pub request: QueryRequest,
    pub result_tx: oneshot::Sender<crate::types::QueryResult>,
}

/// The sending half held by API-facing code. Cloning shares one underlying
/// channel and depth counter — spec.md §4.4 requires depth to be visible to
/// every caller doing queue selection, not just the owner.
#[derive(Clone, Debug)]
pub struct QueueHandle {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    tx: mpsc::Sender<WorkItem>,
    depth: AtomicUsize,
    submitted_total: AtomicU64,
    last_submit_seq: AtomicU64,
    capacity: usize,
}

/// The receiving half, owned by exactly one worker task.
pub struct QueueWorker {
    rx: mpsc::Receiver<WorkItem>,
    inner: Arc<QueueInner>,
}

/// Creates a bound queue pair. `capacity` is the FIFO's maximum depth
/// (spec.md §4.4's per-queue backpressure limit).
pub fn bounded(capacity: usize) -> (QueueHandle, QueueWorker) {
    let (tx, rx) = mpsc::channel(capacity);
    let inner = Arc::new(QueueInner {
        tx,
        depth: AtomicUsize::new(0),
        submitted_total: AtomicU64::new(0),
        last_submit_seq: AtomicU64::new(0),
        capacity,
    });
    (
        QueueHandle { inner: inner.clone() },
        QueueWorker { rx, inner },
    )
}

impl QueueHandle {
    /// Current depth, used by the Selector's min-depth comparison. Relaxed:
    /// a slightly stale read only shifts which otherwise-equal queue wins a
    /// selection race, never breaks correctness.
    pub fn depth(&self) -> usize {
        self.inner.depth.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_full(&self) -> bool {
        self.depth() >= self.inner.capacity
    }

    /// Monotonic submission sequence number, used by the Selector's LRU
    /// tie-break (spec.md §4.5): the queue with the oldest last-submit wins.
    pub fn last_submit_seq(&self) -> u64 {
        self.inner.last_submit_seq.load(Ordering::Relaxed)
    }

    pub fn try_submit(&self, item: WorkItem) -> Result<(), QueueingError> {
        self.inner
            .tx
            .try_send(item)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueingError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => QueueingError::ShuttingDown,
            })?;
        self.inner.depth.fetch_add(1, Ordering::Relaxed);
        let seq = self.inner.submitted_total.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.last_submit_seq.store(seq, Ordering::Relaxed);
        Ok(())
    }
}

impl QueueWorker {
    /// Pulls the next item, decrementing depth on receipt. Returns `None`
    /// once every `QueueHandle` has been dropped (graceful shutdown).
    pub async fn recv(&mut self) -> Option<WorkItem> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.inner.depth.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::QueueKind;

    fn request() -> QueryRequest {
        QueryRequest {
            sql: "SELECT 1".into(),
            bindings: vec![],
            queue_hint: QueueKind::Fast,
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn depth_tracks_submit_and_recv() {
        let (handle, mut worker) = bounded(4);
        assert_eq!(handle.depth(), 0);

        let (tx, _rx) = oneshot::channel();
        handle
            .try_submit(WorkItem { query_id: Uuid::new_v4(), request: request(), result_tx: tx })
            .unwrap();
        assert_eq!(handle.depth(), 1);

        worker.recv().await.unwrap();
        assert_eq!(handle.depth(), 0);
    }

    #[tokio::test]
    async fn full_queue_rejects_submission() {
        let (handle, _worker) = bounded(1);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        handle
            .try_submit(WorkItem { query_id: Uuid::new_v4(), request: request(), result_tx: tx1 })
            .unwrap();
        let err = handle
            .try_submit(WorkItem { query_id: Uuid::new_v4(), request: request(), result_tx: tx2 })
            .unwrap_err();
        assert!(matches!(err, QueueingError::QueueFull));
    }

    #[tokio::test]
    async fn closed_worker_reports_shutting_down() {
        let (handle, worker) = bounded(1);
        drop(worker);
        let (tx, _rx) = oneshot::channel();
        let err = handle
            .try_submit(WorkItem { query_id: Uuid::new_v4(), request: request(), result_tx: tx })
            .unwrap_err();
        assert!(matches!(err, QueueingError::ShuttingDown));
    }

    #[tokio::test]
    async fn last_submit_seq_advances_monotonically() {
        let (handle, mut worker) = bounded(4);
        assert_eq!(handle.last_submit_seq(), 0);
        let (tx, _rx) = oneshot::channel();
        handle
            .try_submit(WorkItem { query_id: Uuid::new_v4(), request: request(), result_tx: tx })
            .unwrap();
        assert_eq!(handle.last_submit_seq(), 1);
        worker.recv().await.unwrap();
    }
}
