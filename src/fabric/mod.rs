//! Cluster fabric: the narrow interfaces the coordinator requires from
//! the underlying cluster-membership service.
//!
//! The coordinator never talks to a network itself. Everything it needs
//! from the cluster is expressed as four primitives:
//!
//! - named durable FIFO queues shared cluster-wide ([`SharedQueue`]),
//! - named cluster-visible maps with atomic ops ([`SharedMap`]),
//! - named cluster-wide mutexes ([`ClusterLock`]),
//! - a node-alive probe and the local node identity ([`ClusterFabric`]).
//!
//! Payloads are opaque [`Bytes`]; the replication layer owns the
//! encoding. [`MemoryFabric`] is an in-memory implementation suitable
//! for tests and single-process clusters.

mod memory;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error as ThisError;

pub use memory::{MemoryFabric, MemoryFabricNode};

use crate::types::NodeName;

pub type FabricResult<T> = std::result::Result<T, FabricError>;

/// Failures of the cluster primitives.
#[derive(Debug, ThisError)]
pub enum FabricError {
    /// A bounded queue offer did not complete in time.
    #[error("timeout offering to queue '{name}' after {timeout:?}")]
    OfferTimeout { name: String, timeout: Duration },

    /// A cluster lock could not be acquired in time.
    #[error("timeout acquiring cluster lock '{name}'")]
    LockTimeout { name: String },

    /// A payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Cluster-durable FIFO queue.
///
/// `take` is the only unbounded wait in the system; callers cancel it by
/// dropping the future (the inbound executor races it against shutdown).
#[async_trait]
pub trait SharedQueue: Send + Sync {
    /// Append an element, waiting at most `timeout` for capacity.
    async fn offer(&self, payload: Bytes, timeout: Duration) -> FabricResult<()>;

    /// Remove and return the head element, waiting until one is available.
    async fn take(&self) -> Bytes;

    /// Remove and return the head element if one is immediately available.
    async fn poll(&self) -> Option<Bytes>;

    /// Number of queued elements.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every queued element.
    async fn clear(&self);
}

/// Cluster-visible keyed map with atomic put/get/remove.
#[async_trait]
pub trait SharedMap: Send + Sync {
    async fn put(&self, key: &str, value: Bytes);

    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Remove the entry, returning the previous value if any.
    async fn remove(&self, key: &str) -> Option<Bytes>;
}

/// Lease held while a cluster lock is owned; dropping it releases the
/// lock.
pub struct LockLease {
    _guard: Box<dyn Any + Send>,
}

impl std::fmt::Debug for LockLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockLease").finish_non_exhaustive()
    }
}

impl LockLease {
    pub fn new(guard: impl Any + Send) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

/// Named cluster-wide mutex.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Acquire the lock, waiting at most `timeout`.
    async fn acquire(&self, timeout: Duration) -> FabricResult<LockLease>;
}

/// Handle to the cluster-membership service.
///
/// Handles returned by `queue`/`map`/`lock` are cheap to clone and safe
/// to cache; the message service memoizes queue handles by name.
pub trait ClusterFabric: Send + Sync {
    /// Identity of the node this process runs as.
    fn local_node(&self) -> &NodeName;

    /// Resolve a named cluster queue, creating it if absent.
    fn queue(&self, name: &str) -> Arc<dyn SharedQueue>;

    /// Resolve a named cluster map, creating it if absent.
    fn map(&self, name: &str) -> Arc<dyn SharedMap>;

    /// Resolve a named cluster mutex, creating it if absent.
    fn lock(&self, name: &str) -> Arc<dyn ClusterLock>;

    /// Liveness probe for a peer node.
    fn is_node_alive(&self, node: &NodeName) -> bool;

    /// Destroy a named queue and its backing storage.
    fn destroy_queue(&self, name: &str);
}
