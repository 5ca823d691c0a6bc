//! Per-database replication coordinator: state and lifecycle.
//!
//! One [`DatabaseReplicator`] runs per replicated database on every
//! node. The outbound half ([`send`]) broadcasts tasks to the partition
//! owners and reduces their responses; the inbound half (the executor
//! worker) drains this node's request queue and applies tasks serially
//! to the local replica.
//!
//! Lifecycle: [`DatabaseReplicator::new`] registers the local node in
//! the partition configuration and starts the resync timer;
//! [`configure_database`] replays the undo record and starts the
//! executor; [`set_online`] opens the local store and releases tasks
//! gated on the online state.
//!
//! [`send`]: DatabaseReplicator::send
//! [`configure_database`]: DatabaseReplicator::configure_database
//! [`set_online`]: DatabaseReplicator::set_online

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use tokio::sync::{broadcast, watch};
use tracing::info;

use super::messages::{request_lock_name, request_queue_name, undo_map_name, MessageService};
use super::partition::DatabaseConfig;
use super::store::ReplicaStore;
use super::task::TaskKind;
use crate::constants::CLUSTER_CONFIG_MAP;
use crate::fabric::{ClusterFabric, ClusterLock, SharedMap, SharedQueue};
use crate::types::{DatabaseName, NodeName};

/// Lazily opens the local replica when the node goes online.
pub type StoreProvider = Box<dyn Fn() -> Arc<dyn ReplicaStore> + Send + Sync>;

/// Per-database replication coordinator.
pub struct DatabaseReplicator {
    pub(super) database: DatabaseName,
    pub(super) msg_service: Arc<MessageService>,
    pub(super) config: RwLock<DatabaseConfig>,
    /// Local replica handle, opened on the first `set_online`.
    store: OnceLock<Arc<dyn ReplicaStore>>,
    store_provider: StoreProvider,
    /// Serializes broadcasts of every dispatcher targeting this
    /// database, cluster-wide.
    pub(super) request_lock: Arc<dyn ClusterLock>,
    /// Crash-recovery record of the request currently being executed.
    pub(super) undo_map: Arc<dyn SharedMap>,
    /// Cluster-visible store of serialized database configurations.
    pub(super) config_map: Arc<dyn SharedMap>,
    pub(super) online_tx: watch::Sender<bool>,
    /// While set, the executor only accepts tasks of this kind.
    wait_for_task_kind: RwLock<Option<TaskKind>>,
    pub(super) shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl DatabaseReplicator {
    /// Create the coordinator, register the local node in any partition
    /// missing it, and start the resync timer if configured.
    ///
    /// The executor worker is not started here; call
    /// [`configure_database`](Self::configure_database) next.
    pub async fn new(
        msg_service: Arc<MessageService>,
        config: DatabaseConfig,
        store_provider: StoreProvider,
    ) -> Arc<Self> {
        let database = config.database.clone();
        let local = msg_service.local_node().clone();
        let fabric = msg_service.fabric();

        let request_lock = fabric.lock(&request_lock_name(&database));
        let undo_map = fabric.map(&undo_map_name(&local, &database));
        let config_map = fabric.map(CLUSTER_CONFIG_MAP);
        let (online_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = broadcast::channel(4);

        let replicator = Arc::new(Self {
            database,
            msg_service,
            config: RwLock::new(config),
            store: OnceLock::new(),
            store_provider,
            request_lock,
            undo_map,
            config_map,
            online_tx,
            wait_for_task_kind: RwLock::new(None),
            shutdown_tx,
            closed: AtomicBool::new(false),
        });

        replicator.check_local_node_in_configuration().await;
        replicator.start_resync_timer();
        replicator
    }

    pub fn database(&self) -> &DatabaseName {
        &self.database
    }

    pub fn local_node(&self) -> &NodeName {
        self.msg_service.local_node()
    }

    /// Snapshot of the current replication configuration.
    pub fn config_snapshot(&self) -> DatabaseConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// The local replica, if it has been opened.
    pub fn store(&self) -> Option<Arc<dyn ReplicaStore>> {
        self.store.get().cloned()
    }

    pub(super) fn request_queue(&self) -> Arc<dyn SharedQueue> {
        self.msg_service
            .queue(&request_queue_name(self.local_node(), &self.database))
    }

    pub fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    /// Open the local replica handle if it is not open yet.
    ///
    /// Normally this happens on `set_online`; the crash-recovery replay
    /// also needs the replica while the node is still offline.
    pub(super) fn ensure_store_open(&self) -> Arc<dyn ReplicaStore> {
        Arc::clone(self.store.get_or_init(|| (self.store_provider)()))
    }

    /// Open the local replica (first call only) and release every task
    /// waiting on the online gate.
    pub fn set_online(&self) {
        self.ensure_store_open();
        self.online_tx.send_replace(true);
        info!(database = %self.database, node = %self.local_node(), "database is online");
    }

    /// Restrict the executor to one task kind while the node bootstraps;
    /// `None` lifts the restriction. The executor clears the filter
    /// itself when the awaited task arrives.
    pub fn set_wait_for_task_kind(&self, kind: Option<TaskKind>) {
        *self
            .wait_for_task_kind
            .write()
            .expect("task-kind filter poisoned") = kind;
    }

    pub(super) fn wait_filter(&self) -> Option<TaskKind> {
        *self
            .wait_for_task_kind
            .read()
            .expect("task-kind filter poisoned")
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the executor worker and resync timer and close the local
    /// replica. In-flight outbound sends observe a total timeout; new
    /// dispatches are refused with [`ReplicationError::Shutdown`].
    ///
    /// [`ReplicationError::Shutdown`]: super::ReplicationError::Shutdown
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        if let Some(store) = self.store.get() {
            store.close().await;
        }
        info!(database = %self.database, node = %self.local_node(), "replication coordinator stopped");
    }
}
