//! # Quorus
//! Per-database distributed replication coordinator for multi-master
//! document databases.
//!
//! Each node of a cluster runs one coordinator instance per replicated
//! database. The coordinator broadcasts write and read tasks to the
//! peer nodes owning a data partition, collects their responses under a
//! configurable quorum, executes inbound peer requests in a single
//! serial order against the local replica, and survives node crashes
//! without losing in-flight messages.
//!
//! # Goals
//! - No consensus machinery: replication rides on pre-existing cluster
//!   primitives (durable named queues, shared maps, cluster-wide locks)
//!   behind the narrow traits of [`fabric`]
//! - Crash safety through a cluster-visible undo record with exactly
//!   one replay
//! - Quorum, result reduction, and read-your-writes semantics decided
//!   per task and per shard
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quorus::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let fabric = MemoryFabric::new();
//!     let node = fabric.register_node("node1");
//!
//!     let service = MessageService::start(Arc::new(node), Tunables::from_env()?);
//!     let config = DatabaseConfig::new(
//!         "orders".into(),
//!         ShardConfig::new(vec!["node1".into(), "node2".into()]).with_write_quorum(2),
//!     );
//!
//!     let replicator = DatabaseReplicator::new(
//!         service,
//!         config,
//!         Box::new(|| Arc::new(MemoryStore::new()) as Arc<dyn ReplicaStore>),
//!     )
//!     .await;
//!     replicator.configure_database(true, true).await;
//!     replicator.set_online();
//!
//!     let response = replicator
//!         .send(
//!             RemoteTask::CreateRecord {
//!                 record_id: "customer:1".to_string(),
//!                 document: serde_json::json!({"name": "Jay"}),
//!             },
//!             None,
//!             ExecutionMode::Response,
//!         )
//!         .await?;
//!     println!("replicated: {response:?}");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod fabric;
pub mod replication;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Main exports for embedding the coordinator.

    pub use crate::config::Tunables;
    pub use crate::error::{Error, Result};
    pub use crate::fabric::{ClusterFabric, MemoryFabric};
    pub use crate::replication::{
        DatabaseConfig, DatabaseReplicator, ExecutionMode, MemoryStore, MessageService,
        RemoteTask, ReplicaStore, ReplicationError, ShardConfig, TaskKind,
    };
    pub use crate::types::{DatabaseName, NodeName, RequestId, ShardName};
}
