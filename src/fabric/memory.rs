//! In-memory cluster fabric.
//!
//! A full-featured single-process implementation of the fabric traits.
//! Every node of a test cluster holds a [`MemoryFabricNode`] onto the
//! same shared [`MemoryFabric`], so queues, maps, and locks behave
//! exactly like their cluster-wide counterparts: a request offered to
//! another node's queue really is taken by that node's executor.
//!
//! This is also the backend for embedded single-process deployments,
//! where several replicated databases live in one process.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::{timeout, Instant};

use super::{ClusterFabric, ClusterLock, FabricError, FabricResult, LockLease, SharedMap, SharedQueue};
use crate::types::NodeName;

/// Shared state of a single-process cluster.
pub struct MemoryFabric {
    queues: DashMap<String, Arc<MemoryQueue>>,
    maps: DashMap<String, Arc<MemoryMap>>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    nodes: DashMap<NodeName, bool>,
}

impl MemoryFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: DashMap::new(),
            maps: DashMap::new(),
            locks: DashMap::new(),
            nodes: DashMap::new(),
        })
    }

    /// Join a node to the fabric and mark it alive.
    pub fn register_node(self: &Arc<Self>, name: impl Into<String>) -> MemoryFabricNode {
        let node = NodeName::new(name);
        self.nodes.insert(node.clone(), true);
        MemoryFabricNode {
            shared: Arc::clone(self),
            local: node,
        }
    }

    /// Flip a node's liveness as seen by `is_node_alive` probes.
    pub fn set_node_alive(&self, node: &NodeName, alive: bool) {
        self.nodes.insert(node.clone(), alive);
    }

    /// Pre-create a queue with a capacity bound, so offers can time out.
    pub fn create_bounded_queue(&self, name: &str, capacity: usize) {
        self.queues
            .insert(name.to_string(), Arc::new(MemoryQueue::bounded(name, capacity)));
    }

    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::unbounded(name)))
            .clone()
    }

    fn map(&self, name: &str) -> Arc<MemoryMap> {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryMap::default()))
            .clone()
    }

    fn lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// One node's view of a [`MemoryFabric`].
#[derive(Clone)]
pub struct MemoryFabricNode {
    shared: Arc<MemoryFabric>,
    local: NodeName,
}

impl MemoryFabricNode {
    pub fn fabric(&self) -> &Arc<MemoryFabric> {
        &self.shared
    }
}

impl ClusterFabric for MemoryFabricNode {
    fn local_node(&self) -> &NodeName {
        &self.local
    }

    fn queue(&self, name: &str) -> Arc<dyn SharedQueue> {
        self.shared.queue(name)
    }

    fn map(&self, name: &str) -> Arc<dyn SharedMap> {
        self.shared.map(name)
    }

    fn lock(&self, name: &str) -> Arc<dyn ClusterLock> {
        Arc::new(MemoryLock {
            name: name.to_string(),
            inner: self.shared.lock(name),
        })
    }

    fn is_node_alive(&self, node: &NodeName) -> bool {
        // A node the fabric has never seen is treated as dead.
        self.shared.nodes.get(node).map(|v| *v).unwrap_or(false)
    }

    fn destroy_queue(&self, name: &str) {
        self.shared.queues.remove(name);
    }
}

// =============================================================================
// Queue
// =============================================================================

struct MemoryQueue {
    name: String,
    capacity: Option<usize>,
    items: StdMutex<VecDeque<Bytes>>,
    /// Signalled when an element is pushed.
    available: Notify,
    /// Signalled when an element is popped (bounded queues only).
    space: Notify,
}

impl MemoryQueue {
    fn unbounded(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capacity: None,
            items: StdMutex::new(VecDeque::new()),
            available: Notify::new(),
            space: Notify::new(),
        }
    }

    fn bounded(name: &str, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::unbounded(name)
        }
    }

    fn try_push(&self, payload: &Bytes) -> bool {
        let mut items = self.items.lock().expect("queue mutex poisoned");
        if let Some(cap) = self.capacity {
            if items.len() >= cap {
                return false;
            }
        }
        items.push_back(payload.clone());
        true
    }
}

#[async_trait]
impl SharedQueue for MemoryQueue {
    async fn offer(&self, payload: Bytes, offer_timeout: Duration) -> FabricResult<()> {
        let deadline = Instant::now() + offer_timeout;
        loop {
            if self.try_push(&payload) {
                self.available.notify_one();
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, self.space.notified()).await.is_err() {
                return Err(FabricError::OfferTimeout {
                    name: self.name.clone(),
                    timeout: offer_timeout,
                });
            }
        }
    }

    async fn take(&self) -> Bytes {
        loop {
            {
                let mut items = self.items.lock().expect("queue mutex poisoned");
                if let Some(head) = items.pop_front() {
                    // Pass the baton to any other waiter if more remain.
                    if !items.is_empty() {
                        self.available.notify_one();
                    }
                    drop(items);
                    self.space.notify_one();
                    return head;
                }
            }
            self.available.notified().await;
        }
    }

    async fn poll(&self) -> Option<Bytes> {
        let head = self
            .items
            .lock()
            .expect("queue mutex poisoned")
            .pop_front();
        if head.is_some() {
            self.space.notify_one();
        }
        head
    }

    async fn len(&self) -> usize {
        self.items.lock().expect("queue mutex poisoned").len()
    }

    async fn clear(&self) {
        self.items.lock().expect("queue mutex poisoned").clear();
        self.space.notify_one();
    }
}

// =============================================================================
// Map
// =============================================================================

#[derive(Default)]
struct MemoryMap {
    entries: DashMap<String, Bytes>,
}

#[async_trait]
impl SharedMap for MemoryMap {
    async fn put(&self, key: &str, value: Bytes) {
        self.entries.insert(key.to_string(), value);
    }

    async fn get(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key).map(|v| v.clone())
    }

    async fn remove(&self, key: &str) -> Option<Bytes> {
        self.entries.remove(key).map(|(_, v)| v)
    }
}

// =============================================================================
// Lock
// =============================================================================

struct MemoryLock {
    name: String,
    inner: Arc<AsyncMutex<()>>,
}

#[async_trait]
impl ClusterLock for MemoryLock {
    async fn acquire(&self, acquire_timeout: Duration) -> FabricResult<LockLease> {
        match timeout(acquire_timeout, Arc::clone(&self.inner).lock_owned()).await {
            Ok(guard) => Ok(LockLease::new(guard)),
            Err(_) => Err(FabricError::LockTimeout {
                name: self.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let fabric = MemoryFabric::new();
        let node = fabric.register_node("n1");
        let queue = node.queue("q");

        queue.offer(payload("a"), Duration::from_secs(1)).await.unwrap();
        queue.offer(payload("b"), Duration::from_secs(1)).await.unwrap();

        assert_eq!(queue.take().await, payload("a"));
        assert_eq!(queue.take().await, payload("b"));
    }

    #[tokio::test]
    async fn test_take_blocks_until_offer() {
        let fabric = MemoryFabric::new();
        let node = fabric.register_node("n1");
        let queue = node.queue("q");

        let taker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!taker.is_finished());

        queue.offer(payload("x"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(taker.await.unwrap(), payload("x"));
    }

    #[tokio::test]
    async fn test_queues_are_shared_across_nodes() {
        let fabric = MemoryFabric::new();
        let n1 = fabric.register_node("n1");
        let n2 = fabric.register_node("n2");

        n1.queue("shared")
            .offer(payload("hello"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(n2.queue("shared").take().await, payload("hello"));
    }

    #[tokio::test]
    async fn test_bounded_queue_offer_times_out() {
        let fabric = MemoryFabric::new();
        fabric.create_bounded_queue("tight", 1);
        let node = fabric.register_node("n1");
        let queue = node.queue("tight");

        queue.offer(payload("a"), Duration::from_millis(10)).await.unwrap();
        let err = queue
            .offer(payload("b"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::OfferTimeout { .. }));
    }

    #[tokio::test]
    async fn test_queue_poll_and_clear() {
        let fabric = MemoryFabric::new();
        let node = fabric.register_node("n1");
        let queue = node.queue("q");

        assert!(queue.poll().await.is_none());
        queue.offer(payload("a"), Duration::from_secs(1)).await.unwrap();
        queue.offer(payload("b"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(queue.len().await, 2);

        assert_eq!(queue.poll().await, Some(payload("a")));
        queue.clear().await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_map_put_get_remove() {
        let fabric = MemoryFabric::new();
        let node = fabric.register_node("n1");
        let map = node.map("m");

        assert!(map.get("k").await.is_none());
        map.put("k", payload("v")).await;
        assert_eq!(map.get("k").await, Some(payload("v")));
        assert_eq!(map.remove("k").await, Some(payload("v")));
        assert!(map.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let fabric = MemoryFabric::new();
        let node = fabric.register_node("n1");
        let lock = node.lock("l");

        let lease = lock.acquire(Duration::from_millis(50)).await.unwrap();
        let err = lock.acquire(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, FabricError::LockTimeout { .. }));

        drop(lease);
        lock.acquire(Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn test_node_liveness() {
        let fabric = MemoryFabric::new();
        let n1 = fabric.register_node("n1");
        fabric.register_node("n2");

        assert!(n1.is_node_alive(&NodeName::new("n2")));
        fabric.set_node_alive(&NodeName::new("n2"), false);
        assert!(!n1.is_node_alive(&NodeName::new("n2")));
        assert!(!n1.is_node_alive(&NodeName::new("ghost")));
    }

    #[tokio::test]
    async fn test_destroy_queue_drops_contents() {
        let fabric = MemoryFabric::new();
        let node = fabric.register_node("n1");

        node.queue("q")
            .offer(payload("a"), Duration::from_secs(1))
            .await
            .unwrap();
        node.destroy_queue("q");
        assert!(node.queue("q").is_empty().await);
    }
}
