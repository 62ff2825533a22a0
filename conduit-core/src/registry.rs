//! Pending-Result Registry (spec.md §4.7): the rendezvous point between the
//! API task that is awaiting a response and the worker task that eventually
//! produces it. A `oneshot` channel per in-flight query replaces the
//! spec's slot-array-of-mutex-and-condvar description (see SPEC_FULL.md §0).

use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::types::QueryResult;

/// Handed to the API task; `await`s exactly one result or a timeout.
pub struct PendingResult {
    rx: oneshot::Receiver<QueryResult>,
}

impl PendingResult {
    pub async fn wait(self, timeout: Duration) -> Result<QueryResult, GatewayError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => Ok(result),
            // The sender was dropped without sending: the worker crashed or
            // its queue shut down mid-flight.
            Ok(Err(_)) => Err(GatewayError::Execution(crate::error::ExecutionError::ConnectionLost)),
            Err(_) => Err(GatewayError::Execution(crate::error::ExecutionError::Timeout)),
        }
    }
}

/// Allocates one rendezvous slot, returning the `query_id` that identifies
/// it, the sender a worker uses to complete it, and the receiver the caller
/// awaits. There is no shared table of slots to manage: the `oneshot` pair
/// itself plus the generated id is the whole registry entry.
pub fn register() -> (Uuid, oneshot::Sender<QueryResult>, PendingResult) {
    let id = Uuid::new_v4();
    let (tx, rx) = oneshot::channel();
    (id, tx, PendingResult { rx })
}
