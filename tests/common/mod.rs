//! Multi-node test cluster built on the in-memory fabric.
//!
//! Every node shares one `MemoryFabric`, so queues, maps, and locks
//! behave exactly like their cluster-wide counterparts while the whole
//! cluster runs in-process.

// Each test binary uses a different slice of this harness.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quorus::config::Tunables;
use quorus::fabric::{ClusterFabric, MemoryFabric, MemoryFabricNode, SharedQueue};
use quorus::replication::{
    DatabaseConfig, DatabaseReplicator, MemoryStore, MessageService, ReplicaStore, ShardConfig,
};
use quorus::types::{DatabaseName, NodeName};

/// How a node participates in the cluster at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// Executor running, replica online.
    Up,
    /// Executor running, replica not yet online.
    UpOffline,
    /// Coordinator built but no executor worker started.
    NoWorker,
    /// Node is dead: no coordinator, liveness probe false.
    Down,
}

pub struct TestNode {
    pub name: NodeName,
    pub mode: NodeMode,
    pub fabric_node: MemoryFabricNode,
    pub store: Arc<MemoryStore>,
    pub service: Option<Arc<MessageService>>,
    pub replicator: Option<Arc<DatabaseReplicator>>,
}

pub struct TestCluster {
    pub database: DatabaseName,
    pub fabric: Arc<MemoryFabric>,
    pub shard: ShardConfig,
    pub tunables: Tunables,
    resync_every_secs: u64,
    nodes: HashMap<String, TestNode>,
}

/// Timeouts small enough to keep failure-path tests fast.
pub fn test_tunables() -> Tunables {
    Tunables {
        queue_timeout: Duration::from_secs(1),
        task_sync_timeout: Duration::from_millis(300),
        task_total_timeout: Duration::from_millis(1_500),
        pending_purge_interval: Duration::from_millis(100),
    }
}

fn provider(store: &Arc<MemoryStore>) -> Box<dyn Fn() -> Arc<dyn ReplicaStore> + Send + Sync> {
    let store = Arc::clone(store);
    Box::new(move || Arc::clone(&store) as Arc<dyn ReplicaStore>)
}

impl TestCluster {
    pub async fn start(database: &str, shard: ShardConfig, specs: &[(&str, NodeMode)]) -> Self {
        Self::start_with_tunables(database, shard, specs, test_tunables()).await
    }

    pub async fn start_with_tunables(
        database: &str,
        shard: ShardConfig,
        specs: &[(&str, NodeMode)],
        tunables: Tunables,
    ) -> Self {
        Self::start_full(database, shard, specs, tunables, 0).await
    }

    /// Full-control constructor; `resync_every_secs > 0` arms the
    /// anti-entropy timer on every coordinator.
    pub async fn start_full(
        database: &str,
        shard: ShardConfig,
        specs: &[(&str, NodeMode)],
        tunables: Tunables,
        resync_every_secs: u64,
    ) -> Self {
        let fabric = MemoryFabric::new();
        let mut cluster = Self {
            database: DatabaseName::new(database),
            fabric,
            shard,
            tunables,
            resync_every_secs,
            nodes: HashMap::new(),
        };
        for (name, mode) in specs {
            cluster.add_node(name, *mode).await;
        }
        cluster
    }

    fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database.clone(), self.shard.clone())
            .with_resync_every(self.resync_every_secs)
    }

    async fn add_node(&mut self, name: &str, mode: NodeMode) {
        let fabric_node = self.fabric.register_node(name);
        let store = Arc::new(MemoryStore::new());

        let mut node = TestNode {
            name: NodeName::new(name),
            mode,
            fabric_node,
            store,
            service: None,
            replicator: None,
        };

        match mode {
            NodeMode::Down => {
                self.fabric.set_node_alive(&node.name, false);
            }
            NodeMode::Up | NodeMode::UpOffline | NodeMode::NoWorker => {
                let service = MessageService::start(
                    Arc::new(node.fabric_node.clone()),
                    self.tunables.clone(),
                );
                let config = self.database_config();
                let replicator =
                    DatabaseReplicator::new(Arc::clone(&service), config, provider(&node.store))
                        .await;
                if mode != NodeMode::NoWorker {
                    replicator.configure_database(true, true).await;
                }
                if mode == NodeMode::Up {
                    replicator.set_online();
                }
                node.service = Some(service);
                node.replicator = Some(replicator);
            }
        }
        self.nodes.insert(name.to_string(), node);
    }

    /// Boot a previously `Down` node, replaying the undo record and
    /// keeping queued requests per the two recovery flags.
    pub async fn bring_up(&mut self, name: &str, restore_messages: bool, unqueue_pending: bool) {
        let node = self.nodes.get_mut(name).expect("unknown node");
        assert_eq!(node.mode, NodeMode::Down, "only down nodes can be brought up");

        self.fabric.set_node_alive(&node.name, true);
        let service = MessageService::start(
            Arc::new(node.fabric_node.clone()),
            self.tunables.clone(),
        );
        let config = DatabaseConfig::new(self.database.clone(), self.shard.clone())
            .with_resync_every(self.resync_every_secs);
        let replicator =
            DatabaseReplicator::new(Arc::clone(&service), config, provider(&node.store)).await;
        replicator
            .configure_database(restore_messages, unqueue_pending)
            .await;
        replicator.set_online();

        node.mode = NodeMode::Up;
        node.service = Some(service);
        node.replicator = Some(replicator);
    }

    pub fn node(&self, name: &str) -> &TestNode {
        self.nodes.get(name).expect("unknown node")
    }

    pub fn replicator(&self, name: &str) -> &Arc<DatabaseReplicator> {
        self.node(name)
            .replicator
            .as_ref()
            .expect("node has no coordinator")
    }

    pub fn store(&self, name: &str) -> &Arc<MemoryStore> {
        &self.node(name).store
    }

    /// Depth of a node's request queue for this database.
    pub async fn request_queue_len(&self, name: &str) -> usize {
        let node = self.node(name);
        node.fabric_node
            .queue(&quorus::replication::request_queue_name(
                &node.name,
                &self.database,
            ))
            .len()
            .await
    }

    pub async fn shutdown(&self) {
        for node in self.nodes.values() {
            if let Some(replicator) = &node.replicator {
                replicator.shutdown().await;
            }
            if let Some(service) = &node.service {
                service.shutdown();
            }
        }
    }
}

/// Wait until `check` passes or the deadline expires.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met in time: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
