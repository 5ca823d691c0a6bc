//! Per-database distributed replication coordinator.
//!
//! Every node runs one [`DatabaseReplicator`] per replicated database.
//! Writes fan out through cluster-durable queues; a configurable quorum
//! of acknowledgements decides when a dispatch is successful; inbound
//! requests are applied serially against the local replica; a
//! cluster-visible undo record makes the inbound side crash-safe.
//!
//! # Architecture
//!
//! ```text
//!        caller                         peer nodes
//!          │                                ▲
//!          ▼                                │ request queues
//!   ┌──────────────┐  broadcast under  ┌────┴────────┐
//!   │  dispatcher  ├──────────────────►│   fabric    │
//!   └──────┬───────┘  per-db mutex     │ queues/maps │
//!          │                           │   /locks    │
//!          ▼ wait                      └────┬────────┘
//!   ┌──────────────┐   on_response          │ local request queue
//!   │   response   │◄────────────┐          ▼
//!   │   manager    │             │    ┌───────────┐  undo map
//!   └──────┬───────┘      ┌──────┴─┐  │ executor  ├──────────►
//!          │              │message │◄─┤  worker   │  execute
//!          ▼ reduce       │service │  └─────┬─────┘
//!       response          └────────┘        ▼
//!                                     local replica
//! ```
//!
//! The subsystems:
//!
//! - [`MessageService`]: queue naming and handle caching, request-id
//!   stamping, and the pending-request registry that routes incoming
//!   responses to their [`ResponseManager`].
//! - [`DatabaseReplicator`]: the coordinator proper: outbound dispatch
//!   with quorum enforcement, the serial inbound executor, crash
//!   recovery, periodic resync, and membership bookkeeping.
//! - [`ReplicaStore`]: the contract of the local document store tasks
//!   are applied to; [`MemoryStore`] is the in-memory implementation.

mod database;
mod dispatcher;
mod error;
mod executor;
mod messages;
pub mod metrics;
mod partition;
mod recovery;
mod request;
mod response_manager;
mod store;
mod task;

pub use database::{DatabaseReplicator, StoreProvider};
pub use error::{ReplicationError, ReplicationResult};
pub use messages::{
    request_lock_name, request_queue_name, response_queue_name, undo_map_name, MessageService,
};
pub use partition::{
    strategy_for, ConfiguredPartitioning, DatabaseConfig, Partition, PartitioningStrategy,
    ShardConfig,
};
pub use request::{ExecutionMode, ReplicationRequest, ReplicationResponse};
pub use response_manager::ResponseManager;
pub use store::{MemoryStore, ReplicaStore, StoreError};
pub use task::{ExecutionContext, QuorumType, RemoteTask, ResultStrategy, RunMode, TaskKind};
