//! Inbound executor: serial application of replicated requests.
//!
//! One worker task per database drains this node's request queue and
//! applies each request against the local replica, strictly in
//! queue-delivery order. The undo record brackets every execution: it is
//! written before the task runs and removed only after the response has
//! been offered, so a crash anywhere in between leaves exactly one
//! request to replay on restart.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::database::DatabaseReplicator;
use super::error::ReplicationError;
use super::messages::{decode, encode, response_queue_name};
use super::metrics;
use super::request::{ReplicationRequest, ReplicationResponse};
use super::store::ReplicaStore;
use super::task::ExecutionContext;
use crate::constants::ONLINE_WAIT_POLL_MS;
use crate::fabric::{SharedMap, SharedQueue};

impl DatabaseReplicator {
    /// Start the executor worker for this database.
    pub(super) fn spawn_worker(self: &Arc<Self>) {
        let replicator = Arc::clone(self);
        tokio::spawn(async move { replicator.run_worker().await });
    }

    async fn run_worker(self: Arc<Self>) {
        let queue = self.request_queue();
        let mut shutdown = self.shutdown_tx.subscribe();
        debug!(
            database = %self.database,
            node = %self.local_node(),
            "listening for incoming requests"
        );

        loop {
            let raw = tokio::select! {
                _ = shutdown.recv() => break,
                raw = queue.take() => raw,
            };

            let request: ReplicationRequest = match decode(&raw) {
                Ok(request) => request,
                Err(err) => {
                    error!(database = %self.database, %err, "undecodable request dropped");
                    continue;
                }
            };

            // Bootstrap filter: while armed, only the awaited task kind
            // gets through; everything else stays unapplied.
            if let Some(kind) = self.wait_filter() {
                if request.task.kind() != kind {
                    debug!(
                        request = %request,
                        waiting_for = %kind,
                        "skipping request, node is not ready for this task kind"
                    );
                    continue;
                }
                self.set_wait_for_task_kind(None);
            }

            if request.task.requires_node_online() && !self.is_online() {
                if !self.wait_until_online(&request, &mut shutdown).await {
                    break;
                }
            }

            self.process_request(&raw, &request).await;
        }

        debug!(
            database = %self.database,
            node = %self.local_node(),
            "request listener stopped"
        );
    }

    /// Poll the online flag until it flips, the coordinator shuts down,
    /// or the watch closes. Returns `false` when the worker must exit.
    async fn wait_until_online(
        &self,
        request: &ReplicationRequest,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        let mut online_rx = self.online_tx.subscribe();
        loop {
            if *online_rx.borrow_and_update() {
                return true;
            }
            debug!(
                request = %request,
                "node is not online, request must wait to be processed"
            );
            tokio::select! {
                _ = shutdown.recv() => return false,
                changed = tokio::time::timeout(
                    Duration::from_millis(ONLINE_WAIT_POLL_MS),
                    online_rx.changed(),
                ) => {
                    if let Ok(Err(_)) = changed {
                        // Watch closed: the coordinator is gone.
                        return false;
                    }
                }
            }
        }
    }

    /// Apply one request end-to-end: undo write, execute, cache clear,
    /// response offer, undo clear.
    pub(super) async fn process_request(&self, raw: &Bytes, request: &ReplicationRequest) {
        // The undo write must land before the task runs; on a crash the
        // restart replays exactly this request.
        self.undo_map
            .put(self.database.as_str(), raw.clone())
            .await;

        let ctx = ExecutionContext::replication(request.sender.clone(), self.database.clone());
        let result = match self.store() {
            Some(store) => {
                let outcome = store.execute(&request.task, &ctx).await;
                // Replicated writes bypass the object cache; drop it even
                // when the task failed.
                store.clear_object_cache();
                outcome.map_err(|err| err.to_string())
            }
            None => Err("replica store is not open".to_string()),
        };

        let outcome_label = if result.is_ok() { "ok" } else { "error" };
        metrics::MESSAGES_PROCESSED
            .with_label_values(&[self.database.as_str(), outcome_label])
            .inc();
        if let Err(message) = &result {
            warn!(request = %request, error = %message, "task execution failed");
        }

        let response = ReplicationResponse {
            request_id: request.id.clone(),
            executor: self.local_node().clone(),
            recipient: request.sender.clone(),
            payload: result,
        };
        self.dispatch_response(request, &response).await;

        // The replay window has closed on this side.
        self.undo_map.remove(self.database.as_str()).await;
    }

    /// Offer the response to the sender's response queue. A failure is
    /// logged and swallowed: the task is applied locally either way, the
    /// sender will observe a timeout.
    async fn dispatch_response(&self, request: &ReplicationRequest, response: &ReplicationResponse) {
        let payload = match encode(response) {
            Ok(payload) => payload,
            Err(err) => {
                error!(request = %request, %err, "cannot encode response");
                return;
            }
        };

        let queue = self
            .msg_service
            .queue(&response_queue_name(&request.sender));
        let timeout = self.msg_service.tunables().queue_timeout;
        if let Err(cause) = queue.offer(payload, timeout).await {
            let err = ReplicationError::ResponseDispatchFailed {
                request_id: request.id.to_string(),
                recipient: request.sender.to_string(),
            };
            error!(%err, %cause, "task stays applied locally, sender will time out");
        }
    }
}
