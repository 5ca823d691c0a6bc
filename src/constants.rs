//! Centralized naming and timing constants.
//!
//! The queue, map, and lock names below are the coordinator's wire-level
//! contract with the cluster fabric: every node derives the same names
//! from (node, database), which is what lets any node enqueue work for
//! any other node without a handshake.

// =============================================================================
// Cluster resource naming
// =============================================================================

/// Prefix shared by every per-node cluster resource.
pub const NODE_QUEUE_PREFIX: &str = "orientdb.node.";

/// Suffix of a node's per-database request queue.
pub const NODE_QUEUE_REQUEST_POSTFIX: &str = ".request";

/// Suffix of a node's response queue (one per node, not per database).
pub const NODE_QUEUE_RESPONSE_POSTFIX: &str = ".response";

/// Suffix of a node's per-database undo map.
pub const NODE_QUEUE_UNDO_POSTFIX: &str = ".undo";

/// Prefix of the per-database broadcast mutex.
///
/// Holding this lock across the enqueue loop is what gives all receivers
/// the same linear order of requests from concurrent dispatchers.
pub const REQUEST_LOCK_PREFIX: &str = "orientdb.reqlock.";

/// Shared map holding the serialized replication configuration of every
/// database, keyed by database name.
pub const CLUSTER_CONFIG_MAP: &str = "orientdb.cluster.config";

/// Default shard name: the partition that owns records not assigned to a
/// named shard.
pub const DEFAULT_SHARD: &str = "*";

// =============================================================================
// Timing defaults
// =============================================================================

/// Default bound on every queue `offer` and cluster lock acquisition, in
/// milliseconds.
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 5_000;

/// Default per-node base for a task's synchronous-response timeout, in
/// milliseconds. A dispatch expecting N synchronous responses waits up to
/// N times this value.
pub const DEFAULT_TASK_SYNCH_TIMEOUT_MS: u64 = 5_000;

/// Default per-node base for a task's total timeout, in milliseconds.
/// Bounds the full lifetime of a pending request across all targets.
pub const DEFAULT_TASK_TOTAL_TIMEOUT_MS: u64 = 30_000;

/// Default sweep interval for expired pending-response managers, in
/// milliseconds.
pub const DEFAULT_PENDING_PURGE_INTERVAL_MS: u64 = 1_000;

/// Poll interval of the executor's online-gate wait, in milliseconds.
pub const ONLINE_WAIT_POLL_MS: u64 = 5_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_constants_are_stable() {
        // These strings are a cross-node contract; a change here is a
        // rolling-upgrade break.
        assert_eq!(NODE_QUEUE_PREFIX, "orientdb.node.");
        assert_eq!(NODE_QUEUE_REQUEST_POSTFIX, ".request");
        assert_eq!(NODE_QUEUE_RESPONSE_POSTFIX, ".response");
        assert_eq!(NODE_QUEUE_UNDO_POSTFIX, ".undo");
        assert_eq!(REQUEST_LOCK_PREFIX, "orientdb.reqlock.");
    }

    #[test]
    fn test_timing_defaults_are_sane() {
        assert!(DEFAULT_QUEUE_TIMEOUT_MS > 0);
        assert!(DEFAULT_TASK_TOTAL_TIMEOUT_MS > DEFAULT_TASK_SYNCH_TIMEOUT_MS);
    }
}
