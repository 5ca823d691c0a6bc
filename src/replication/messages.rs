//! Message service: queue naming, handle caching, and response routing.
//!
//! One message service runs per process. It owns the process-wide cache
//! of cluster queue handles, stamps outbound request ids, and keeps the
//! pending-request registry that demultiplexes incoming responses onto
//! their [`ResponseManager`]s.
//!
//! Request queues are per (node, database); the response queue is per
//! node, shared by all of its databases, and drained by a single
//! listener task spawned here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::metrics;
use super::response_manager::ResponseManager;
use super::request::ReplicationResponse;
use crate::config::Tunables;
use crate::constants::{
    NODE_QUEUE_PREFIX, NODE_QUEUE_REQUEST_POSTFIX, NODE_QUEUE_RESPONSE_POSTFIX,
    NODE_QUEUE_UNDO_POSTFIX, REQUEST_LOCK_PREFIX,
};
use crate::fabric::{ClusterFabric, FabricResult, SharedQueue};
use crate::types::{DatabaseName, NodeName, RequestId};

/// Name of a node's per-database request queue.
pub fn request_queue_name(node: &NodeName, database: &DatabaseName) -> String {
    format!("{NODE_QUEUE_PREFIX}{node}.{database}{NODE_QUEUE_REQUEST_POSTFIX}")
}

/// Name of a node's response queue.
pub fn response_queue_name(node: &NodeName) -> String {
    format!("{NODE_QUEUE_PREFIX}{node}{NODE_QUEUE_RESPONSE_POSTFIX}")
}

/// Name of a node's per-database undo map.
pub fn undo_map_name(node: &NodeName, database: &DatabaseName) -> String {
    format!("{NODE_QUEUE_PREFIX}{node}.{database}{NODE_QUEUE_UNDO_POSTFIX}")
}

/// Name of the per-database broadcast mutex.
pub fn request_lock_name(database: &DatabaseName) -> String {
    format!("{REQUEST_LOCK_PREFIX}{database}")
}

pub(crate) fn encode<T: Serialize>(value: &T) -> FabricResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &Bytes) -> FabricResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Process-wide messaging hub.
pub struct MessageService {
    fabric: Arc<dyn ClusterFabric>,
    tunables: Tunables,
    /// Memoized queue handles; explicit teardown via `remove_queue`.
    queues: DashMap<String, Arc<dyn SharedQueue>>,
    /// In-flight outbound requests awaiting responses.
    pending: DashMap<RequestId, Arc<ResponseManager>>,
    next_seq: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl MessageService {
    /// Build the service and spawn its response listener and pending
    /// purge tasks.
    pub fn start(fabric: Arc<dyn ClusterFabric>, tunables: Tunables) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let service = Arc::new(Self {
            fabric,
            tunables,
            queues: DashMap::new(),
            pending: DashMap::new(),
            next_seq: AtomicU64::new(0),
            shutdown_tx,
        });

        tokio::spawn(Arc::clone(&service).run_response_listener());
        tokio::spawn(Arc::clone(&service).run_pending_purge());

        service
    }

    pub fn local_node(&self) -> &NodeName {
        self.fabric.local_node()
    }

    pub fn fabric(&self) -> &Arc<dyn ClusterFabric> {
        &self.fabric
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Stamp a cluster-unique id for an outbound request.
    pub fn next_request_id(&self) -> RequestId {
        RequestId::new(
            self.fabric.local_node().clone(),
            self.next_seq.fetch_add(1, Ordering::Relaxed),
        )
    }

    /// Resolve a queue handle through the process-wide cache.
    pub fn queue(&self, name: &str) -> Arc<dyn SharedQueue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| self.fabric.queue(name))
            .clone()
    }

    /// Drop a queue from the cache and destroy its backing storage; used
    /// when a node leaves the cluster.
    pub fn remove_queue(&self, name: &str) {
        self.queues.remove(name);
        self.fabric.destroy_queue(name);
        debug!(queue = name, "removed queue");
    }

    /// Register an in-flight request. Must happen before the broadcast
    /// so no response can arrive unmatched.
    pub fn register_request(&self, manager: Arc<ResponseManager>) {
        self.pending.insert(manager.request_id().clone(), manager);
    }

    pub fn unregister_request(&self, id: &RequestId) {
        self.pending.remove(id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Stop the listener and purge tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn run_response_listener(self: Arc<Self>) {
        let queue = self.queue(&response_queue_name(self.fabric.local_node()));
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let raw = tokio::select! {
                _ = shutdown.recv() => break,
                raw = queue.take() => raw,
            };
            match decode::<ReplicationResponse>(&raw) {
                Ok(response) => self.route_response(response),
                Err(err) => error!(%err, "undecodable response dropped"),
            }
        }
        debug!(node = %self.fabric.local_node(), "response listener stopped");
    }

    fn route_response(&self, response: ReplicationResponse) {
        let manager = self
            .pending
            .get(&response.request_id)
            .map(|entry| Arc::clone(entry.value()));
        match manager {
            Some(manager) => {
                let id = response.request_id.clone();
                if manager.on_response(response) {
                    // Every expected node responded: the manager is done.
                    self.pending.remove(&id);
                }
            }
            None => {
                metrics::RESPONSES_DISCARDED.inc();
                debug!(
                    request = %response.request_id,
                    from = %response.executor,
                    "late response discarded, no pending request"
                );
            }
        }
    }

    async fn run_pending_purge(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut tick = tokio::time::interval(self.tunables.pending_purge_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tick.tick() => {}
            }
            self.pending.retain(|id, manager| {
                if manager.is_expired() {
                    warn!(request = %id, "purging expired pending request");
                    false
                } else {
                    true
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::MemoryFabric;
    use serde_json::json;
    use std::time::Duration;

    fn names(node: &str, db: &str) -> (NodeName, DatabaseName) {
        (NodeName::new(node), DatabaseName::new(db))
    }

    #[test]
    fn test_queue_naming_contract() {
        let (node, db) = names("europe0", "demo");
        assert_eq!(
            request_queue_name(&node, &db),
            "orientdb.node.europe0.demo.request"
        );
        assert_eq!(response_queue_name(&node), "orientdb.node.europe0.response");
        assert_eq!(undo_map_name(&node, &db), "orientdb.node.europe0.demo.undo");
        assert_eq!(request_lock_name(&db), "orientdb.reqlock.demo");
    }

    #[tokio::test]
    async fn test_request_ids_are_monotonic() {
        let fabric = MemoryFabric::new();
        let service = MessageService::start(
            Arc::new(fabric.register_node("n1")),
            Tunables::default(),
        );
        let a = service.next_request_id();
        let b = service.next_request_id();
        assert_eq!(a.node, NodeName::new("n1"));
        assert!(b.seq > a.seq);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_queue_handles_are_cached() {
        let fabric = MemoryFabric::new();
        let service = MessageService::start(
            Arc::new(fabric.register_node("n1")),
            Tunables::default(),
        );
        let a = service.queue("q");
        let b = service.queue("q");
        assert!(Arc::ptr_eq(&a, &b));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_responses_route_to_pending_manager() {
        let fabric = MemoryFabric::new();
        let node = fabric.register_node("n1");
        let service = MessageService::start(Arc::new(node.clone()), Tunables::default());

        let id = service.next_request_id();
        let manager = Arc::new(ResponseManager::new(
            id.clone(),
            vec![NodeName::new("n2")],
            1,
            1,
            false,
            NodeName::new("n1"),
            Duration::from_secs(1),
            Duration::from_secs(2),
        ));
        service.register_request(Arc::clone(&manager));

        let response = ReplicationResponse::success(
            id,
            NodeName::new("n2"),
            NodeName::new("n1"),
            json!({"ok": true}),
        );
        node.queue(&response_queue_name(&NodeName::new("n1")))
            .offer(encode(&response).unwrap(), Duration::from_secs(1))
            .await
            .unwrap();

        manager.wait_for_synchronous_responses().await.unwrap();
        // All expected nodes responded, so the registration is gone.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(service.pending_count(), 0);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let fabric = MemoryFabric::new();
        let node = fabric.register_node("n1");
        let service = MessageService::start(Arc::new(node.clone()), Tunables::default());

        let response = ReplicationResponse::success(
            RequestId::new(NodeName::new("n1"), 999),
            NodeName::new("n2"),
            NodeName::new("n1"),
            json!(null),
        );
        node.queue(&response_queue_name(&NodeName::new("n1")))
            .offer(encode(&response).unwrap(), Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(service.pending_count(), 0);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_purge_drops_expired_managers() {
        let fabric = MemoryFabric::new();
        let tunables = Tunables {
            pending_purge_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let service = MessageService::start(Arc::new(fabric.register_node("n1")), tunables);

        let manager = Arc::new(ResponseManager::new(
            service.next_request_id(),
            vec![NodeName::new("n2")],
            1,
            1,
            false,
            NodeName::new("n1"),
            Duration::from_millis(5),
            Duration::from_millis(5),
        ));
        service.register_request(manager);
        assert_eq!(service.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.pending_count(), 0);
        service.shutdown();
    }
}
