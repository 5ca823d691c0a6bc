//! Crash recovery, periodic resync, and membership churn.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::database::DatabaseReplicator;
use super::messages::{decode, request_queue_name};
use super::metrics;
use super::request::{ExecutionMode, ReplicationRequest};
use super::task::RemoteTask;
use crate::fabric::{SharedMap, SharedQueue};
use crate::types::NodeName;

impl DatabaseReplicator {
    /// Bring the inbound side up: replay the undo record left by a
    /// crash, reconcile pending queue entries, and start the executor
    /// worker.
    ///
    /// With `restore_messages` the undo record (if any) is re-executed
    /// once before anything else; it is cleared either way. With
    /// `unqueue_pending` requests that were already queued before the
    /// restart stay queued and are applied by the worker; otherwise they
    /// are purged.
    pub async fn configure_database(
        self: &Arc<Self>,
        restore_messages: bool,
        unqueue_pending: bool,
    ) {
        self.restore_message_before_failure(restore_messages).await;
        self.check_pending_messages(unqueue_pending).await;
        self.spawn_worker();
    }

    async fn restore_message_before_failure(&self, restore_messages: bool) {
        let Some(raw) = self.undo_map.remove(self.database.as_str()).await else {
            return;
        };
        if !restore_messages {
            return;
        }

        match decode::<ReplicationRequest>(&raw) {
            Ok(request) => {
                warn!(
                    database = %self.database,
                    request = %request,
                    "restoring last replication message before the crash"
                );
                metrics::UNDO_RESTORES
                    .with_label_values(&[self.database.as_str()])
                    .inc();
                // The replay must hit the replica even though the node
                // is not online yet.
                self.ensure_store_open();
                // The replayed response goes out again; the original
                // sender has long since timed out and discards it.
                self.process_request(&raw, &request).await;
            }
            Err(err) => {
                error!(
                    database = %self.database,
                    %err,
                    "cannot decode the undo record, skipping replay"
                );
            }
        }
    }

    async fn check_pending_messages(&self, unqueue_pending: bool) {
        let queue = self.request_queue();
        let pending = queue.len().await;
        if pending == 0 {
            return;
        }
        if unqueue_pending {
            info!(
                database = %self.database,
                pending,
                "found previous messages in the request queue, aligning the database"
            );
        } else {
            warn!(
                database = %self.database,
                pending,
                "purging previous messages from the request queue"
            );
            queue.clear().await;
        }
    }

    /// Start the anti-entropy timer when the configuration asks for it.
    pub(super) fn start_resync_timer(self: &Arc<Self>) {
        let Some(every) = self.config_snapshot().resync_every() else {
            return;
        };
        let replicator = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = replicator.shutdown_tx.subscribe();
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of an interval fires immediately; resync
            // should first fire one full period after startup.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tick.tick() => replicator.resync().await,
                }
            }
        });
    }

    /// One best-effort anti-entropy round against the own partition.
    async fn resync(&self) {
        let started = Instant::now();
        match self.send(RemoteTask::Resync, None, ExecutionMode::Response).await {
            Ok(_) => debug!(database = %self.database, "resync round completed"),
            // Quorum and timeout failures are expected while peers are
            // down; the next tick retries.
            Err(err) => debug!(database = %self.database, %err, "resync round failed"),
        }
        metrics::RESYNC_DURATION
            .with_label_values(&[self.database.as_str()])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Ensure the local node owns every partition it should; publishes
    /// the updated configuration when something changed.
    pub(super) async fn check_local_node_in_configuration(&self) {
        let local = self.local_node().clone();
        let (touched, snapshot) = {
            let mut config = self.config.write().expect("config lock poisoned");
            let touched = config.add_node_to_partitions(&local);
            (touched, config.clone())
        };
        if touched.is_empty() {
            return;
        }
        info!(
            database = %self.database,
            node = %local,
            shards = ?touched,
            "adding local node to partitions"
        );
        self.publish_configuration(&snapshot).await;
    }

    /// React to a node departure: drop it from the partitions, retire
    /// its request queue, and publish the new configuration.
    pub async fn remove_node_from_configuration(&self, node: &NodeName, force: bool) {
        let (touched, snapshot) = {
            let mut config = self.config.write().expect("config lock poisoned");
            let touched = config.remove_node_from_partitions(node, force);
            (touched, config.clone())
        };
        if touched.is_empty() {
            return;
        }
        info!(
            database = %self.database,
            node = %node,
            shards = ?touched,
            "removing node from partitions"
        );
        self.msg_service
            .remove_queue(&request_queue_name(node, &self.database));
        self.publish_configuration(&snapshot).await;
    }

    async fn publish_configuration(&self, config: &super::partition::DatabaseConfig) {
        match config.serialize() {
            Ok(bytes) => {
                self.config_map.put(self.database.as_str(), bytes).await;
            }
            Err(err) => {
                error!(database = %self.database, %err, "cannot serialize configuration");
            }
        }
    }
}
