//! Replication-protocol errors.
//!
//! The outbound path surfaces these to callers; the inbound path logs
//! and keeps draining so one bad message cannot stop replication.

use thiserror::Error as ThisError;

use crate::fabric::FabricError;

pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, ThisError)]
pub enum ReplicationError {
    /// The partition resolved to an empty node set. Fatal to the caller.
    #[error("no nodes configured for partition '{database}.{shard}'")]
    NoTargets { database: String, shard: String },

    /// The configured quorum exceeds the target set and the shard runs
    /// the strict availability policy. Fatal to the caller.
    #[error(
        "quorum {quorum} cannot be reached with {queue_size} target nodes \
         and strict availability policy"
    )]
    QuorumUnreachable { quorum: usize, queue_size: usize },

    /// The broadcast failed (lock timeout, offer timeout, encoding). The
    /// pending response manager has been unregistered.
    #[error("dispatch of request {request_id} failed: {source}")]
    DispatchFailed {
        request_id: String,
        #[source]
        source: FabricError,
    },

    /// The synchronous-response threshold was not met in time. Non-fatal:
    /// the dispatcher logs it and reduces whatever arrived.
    #[error("synchronous-response threshold not met within {timeout_ms}ms")]
    SynchronousTimeout { timeout_ms: u64 },

    /// Nothing usable arrived within the request's total lifetime. Fatal
    /// to the caller.
    #[error("request {request_id} received no usable response within its total timeout")]
    TotalTimeout { request_id: String },

    /// The executor could not enqueue its response. The task is applied
    /// locally; the sender will observe a timeout.
    #[error("cannot dispatch response for request {request_id} to node '{recipient}'")]
    ResponseDispatchFailed {
        request_id: String,
        recipient: String,
    },

    /// Every collected response was an error marker; `message` is the
    /// first failure, `node` the replica that produced it.
    #[error("task failed on node '{node}': {message}")]
    TaskFailed { node: String, message: String },

    /// The coordinator was shut down before this dispatch started; new
    /// dispatches are refused, in-flight ones ride out their total
    /// timeout.
    #[error("coordinator for database '{database}' is shut down")]
    Shutdown { database: String },
}
