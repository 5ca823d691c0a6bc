//! Outbound dispatch: broadcast, quorum, and response collection.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::database::DatabaseReplicator;
use super::error::{ReplicationError, ReplicationResult};
use super::messages::{encode, request_queue_name};
use super::metrics;
use super::partition::{strategy_for, DatabaseConfig};
use super::request::{ExecutionMode, ReplicationRequest};
use super::response_manager::ResponseManager;
use super::task::{QuorumType, RemoteTask, ResultStrategy};
use crate::constants::DEFAULT_SHARD;
use crate::fabric::{ClusterFabric, ClusterLock, SharedQueue};
use crate::types::{NodeName, ShardName};

impl DatabaseReplicator {
    /// Broadcast `task` to the nodes owning (database, shard) and return
    /// the reduced response, or `None` in fire-and-forget mode.
    pub async fn send(
        &self,
        task: RemoteTask,
        shard: Option<ShardName>,
        mode: ExecutionMode,
    ) -> ReplicationResult<Option<Value>> {
        let nodes = {
            let config = self.config.read().expect("config lock poisoned");
            let strategy = strategy_for(config.partition_strategy(shard.as_ref()));
            strategy.partition(&config, shard.as_ref()).nodes
        };

        let request = ReplicationRequest {
            id: self.msg_service.next_request_id(),
            sender: self.local_node().clone(),
            database: self.database.clone(),
            shard,
            task,
            mode,
        };
        self.send_to_nodes(request, nodes).await
    }

    /// Broadcast a request to an explicit node set.
    pub async fn send_to_nodes(
        &self,
        mut request: ReplicationRequest,
        nodes: Vec<NodeName>,
    ) -> ReplicationResult<Option<Value>> {
        // In-flight sends ride out a shutdown until their total timeout;
        // new dispatches are refused up front.
        if self.is_shut_down() {
            return Err(ReplicationError::Shutdown {
                database: self.database.to_string(),
            });
        }

        let shard_label = request
            .shard
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| DEFAULT_SHARD.to_string());

        if nodes.is_empty() {
            error!(
                database = %self.database,
                shard = %shard_label,
                request = %request,
                "no nodes configured for partition"
            );
            return Err(ReplicationError::NoTargets {
                database: self.database.to_string(),
                shard: shard_label,
            });
        }

        let config = self.config_snapshot();
        let quorum = calculate_quorum(
            request.task.quorum_type(),
            request.shard.as_ref(),
            &config,
            nodes.len(),
        )?;

        request.sender = self.local_node().clone();

        let available_nodes = nodes
            .iter()
            .filter(|node| {
                let alive = self.msg_service.fabric().is_node_alive(node);
                if !alive {
                    debug!(
                        node = %node,
                        request = %request,
                        "not counting response from offline node"
                    );
                }
                alive
            })
            .count();

        let queue_size = nodes.len();
        let expected_sync = match request.task.result_strategy() {
            // A union fan-in needs every live node's slice of the result.
            ResultStrategy::Union => available_nodes,
            _ => quorum.min(available_nodes).max(1),
        };

        let wait_local = nodes.contains(self.local_node())
            && config.read_your_writes(request.shard.as_ref());

        let tunables = self.msg_service.tunables();
        let manager = Arc::new(ResponseManager::new(
            request.id.clone(),
            nodes.clone(),
            expected_sync,
            quorum,
            wait_local,
            self.local_node().clone(),
            request.task.synchronous_timeout(tunables, expected_sync),
            request.task.total_timeout(tunables, queue_size),
        ));
        self.msg_service.register_request(Arc::clone(&manager));

        debug!(
            request = %request,
            nodes = ?nodes,
            quorum,
            expected_sync,
            wait_local,
            "dispatching request"
        );

        if let Err(source) = self.broadcast(&request, &nodes).await {
            self.msg_service.unregister_request(&request.id);
            return Err(ReplicationError::DispatchFailed {
                request_id: request.id.to_string(),
                source,
            });
        }
        // Deadlines start after the broadcast unlock.
        manager.arm();

        metrics::MESSAGES_SENT
            .with_label_values(&[self.database.as_str()])
            .inc();

        if !request.mode.collects_responses() {
            return Ok(None);
        }
        self.collect_responses(&request, &manager).await.map(Some)
    }

    /// Enqueue the request on every target under the per-database
    /// cluster mutex, so concurrent dispatchers produce the same order
    /// on every shared queue.
    async fn broadcast(
        &self,
        request: &ReplicationRequest,
        nodes: &[NodeName],
    ) -> crate::fabric::FabricResult<()> {
        let payload = encode(request)?;
        let timeout = self.msg_service.tunables().queue_timeout;

        let lease = self.request_lock.acquire(timeout).await?;
        for node in nodes {
            let queue = self
                .msg_service
                .queue(&request_queue_name(node, &self.database));
            queue.offer(payload.clone(), timeout).await?;
        }
        drop(lease);
        Ok(())
    }

    async fn collect_responses(
        &self,
        request: &ReplicationRequest,
        manager: &ResponseManager,
    ) -> ReplicationResult<Value> {
        match manager.wait_for_synchronous_responses().await {
            Ok(()) => {}
            Err(err @ ReplicationError::SynchronousTimeout { .. }) => {
                warn!(
                    request = %request,
                    expected = ?manager.expected_nodes(),
                    responding = ?manager.responding_nodes(),
                    %err,
                    "reducing best-effort after the synchronous deadline"
                );
            }
            Err(err) => {
                self.msg_service.unregister_request(&request.id);
                return Err(err);
            }
        }

        if manager.is_wait_local() && !manager.local_node_responded() {
            warn!(
                request = %request,
                "no response received from the local node"
            );
        }

        manager.reduce(request.task.result_strategy())
    }
}

/// Raw quorum for a task against a target set of `queue_size` nodes.
fn calculate_quorum(
    quorum_type: QuorumType,
    shard: Option<&ShardName>,
    config: &DatabaseConfig,
    queue_size: usize,
) -> ReplicationResult<usize> {
    let quorum = match quorum_type {
        QuorumType::None => 0,
        QuorumType::Read => config.read_quorum(shard),
        QuorumType::Write => config.write_quorum(shard),
        QuorumType::All => queue_size,
    };

    if quorum > queue_size {
        if config.fail_when_available_less_than_quorum(shard) {
            return Err(ReplicationError::QuorumUnreachable { quorum, queue_size });
        }
        debug!(
            quorum,
            queue_size, "quorum exceeds target nodes, downgrading to the queue size"
        );
        return Ok(queue_size);
    }
    Ok(quorum)
}
