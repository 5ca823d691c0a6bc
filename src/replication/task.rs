//! Remote tasks and their replication policy.
//!
//! A task is the unit of work a coordinator fans out to the nodes of a
//! partition. Each variant carries its own replication policy: which
//! quorum gate applies, how per-node results are reduced, whether the
//! receiving replica must be online, and how long the sender waits.
//!
//! Tasks are plain serde data; the local replica interprets them through
//! [`crate::replication::ReplicaStore::execute`]. Matching on the
//! [`TaskKind`] tag is how the executor's bootstrap filter recognizes the
//! task it is waiting for.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Tunables;
use crate::types::{DatabaseName, NodeName};

/// Quorum gate a task requests for its dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumType {
    /// No acknowledgement required.
    None,
    /// The shard's configured read quorum.
    Read,
    /// The shard's configured write quorum.
    Write,
    /// Every targeted node must acknowledge.
    All,
}

/// Reduction policy applied to the per-node responses of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStrategy {
    /// First successful payload in arrival order.
    First,
    /// Modal payload; deterministic tie-break by payload hash, then
    /// responder name.
    Majority,
    /// Merge of all successful payloads.
    Union,
    /// Any successful payload.
    Any,
}

/// Stable tag identifying a task variant.
///
/// The executor's bootstrap filter compares tags, never runtime types.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    CreateRecord,
    ReadRecord,
    UpdateRecord,
    DeleteRecord,
    Command,
    Resync,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::CreateRecord => "create-record",
            TaskKind::ReadRecord => "read-record",
            TaskKind::UpdateRecord => "update-record",
            TaskKind::DeleteRecord => "delete-record",
            TaskKind::Command => "command",
            TaskKind::Resync => "resync",
        };
        f.write_str(name)
    }
}

/// A replicated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteTask {
    /// Store a new document under `record_id`.
    CreateRecord { record_id: String, document: Value },

    /// Load the document stored under `record_id`.
    ReadRecord { record_id: String },

    /// Replace the document, guarded by its expected current version.
    UpdateRecord {
        record_id: String,
        document: Value,
        version: u64,
    },

    /// Delete the document, guarded by its expected current version.
    DeleteRecord { record_id: String, version: u64 },

    /// Run a command statement against the local replica.
    Command { statement: String },

    /// Anti-entropy round issued by the resync timer.
    Resync,
}

impl RemoteTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            RemoteTask::CreateRecord { .. } => TaskKind::CreateRecord,
            RemoteTask::ReadRecord { .. } => TaskKind::ReadRecord,
            RemoteTask::UpdateRecord { .. } => TaskKind::UpdateRecord,
            RemoteTask::DeleteRecord { .. } => TaskKind::DeleteRecord,
            RemoteTask::Command { .. } => TaskKind::Command,
            RemoteTask::Resync => TaskKind::Resync,
        }
    }

    pub fn quorum_type(&self) -> QuorumType {
        match self {
            RemoteTask::ReadRecord { .. } => QuorumType::Read,
            _ => QuorumType::Write,
        }
    }

    pub fn result_strategy(&self) -> ResultStrategy {
        match self {
            RemoteTask::CreateRecord { .. }
            | RemoteTask::UpdateRecord { .. }
            | RemoteTask::DeleteRecord { .. } => ResultStrategy::Majority,
            RemoteTask::ReadRecord { .. } => ResultStrategy::First,
            RemoteTask::Command { .. } => ResultStrategy::Union,
            RemoteTask::Resync => ResultStrategy::Any,
        }
    }

    /// Whether the receiving replica must be online before applying.
    ///
    /// Resync is the priming task a bootstrapping node is waiting for, so
    /// it must be processable while the node is still offline.
    pub fn requires_node_online(&self) -> bool {
        !matches!(self, RemoteTask::Resync)
    }

    /// How long the sender waits for the expected synchronous responses.
    pub fn synchronous_timeout(&self, tunables: &Tunables, expected_sync: usize) -> Duration {
        tunables.task_sync_timeout * expected_sync.max(1) as u32
    }

    /// Upper bound on the request's total lifetime.
    pub fn total_timeout(&self, tunables: &Tunables, total_nodes: usize) -> Duration {
        tunables.task_total_timeout * total_nodes.max(1) as u32
    }
}

/// Who initiated the current store operation.
///
/// The executor runs tasks under [`RunMode::Replication`], which tells
/// the store that the write arrived over the replication channel and
/// must not be broadcast again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// A direct client operation on this node.
    Local,
    /// An operation driven by a peer's replicated request.
    Replication,
}

/// Call-scoped execution context handed to the store with every task.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_mode: RunMode,
    pub sender: NodeName,
    pub database: DatabaseName,
}

impl ExecutionContext {
    pub fn replication(sender: NodeName, database: DatabaseName) -> Self {
        Self {
            run_mode: RunMode::Replication,
            sender,
            database,
        }
    }
}
