//! Per-request response aggregation and quorum accounting.
//!
//! One [`ResponseManager`] exists for every in-flight outbound request.
//! The message service's response listener feeds it per-node responses;
//! the dispatching task blocks on [`wait_for_synchronous_responses`]
//! until the quorum threshold is met or a deadline passes, then reduces
//! the collected payloads with the task's result strategy.
//!
//! [`wait_for_synchronous_responses`]: ResponseManager::wait_for_synchronous_responses

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::error::{ReplicationError, ReplicationResult};
use super::request::ReplicationResponse;
use super::task::ResultStrategy;
use crate::types::{NodeName, RequestId};

struct Inner {
    /// Responses in arrival order.
    responses: Vec<ReplicationResponse>,
    local_received: bool,
    /// Deadlines run from the instant after the broadcast unlock.
    armed_at: Instant,
}

/// Collects the per-node responses of one dispatch.
pub struct ResponseManager {
    request_id: RequestId,
    expected_nodes: Vec<NodeName>,
    expected_sync: usize,
    quorum: usize,
    wait_local: bool,
    local_node: NodeName,
    sync_timeout: Duration,
    total_timeout: Duration,
    inner: Mutex<Inner>,
    progress: Notify,
}

impl ResponseManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: RequestId,
        expected_nodes: Vec<NodeName>,
        expected_sync: usize,
        quorum: usize,
        wait_local: bool,
        local_node: NodeName,
        sync_timeout: Duration,
        total_timeout: Duration,
    ) -> Self {
        Self {
            request_id,
            expected_nodes,
            expected_sync,
            quorum,
            wait_local,
            local_node,
            sync_timeout,
            total_timeout,
            inner: Mutex::new(Inner {
                responses: Vec::new(),
                local_received: false,
                armed_at: Instant::now(),
            }),
            progress: Notify::new(),
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn expected_sync(&self) -> usize {
        self.expected_sync
    }

    pub fn is_wait_local(&self) -> bool {
        self.wait_local
    }

    pub fn expected_nodes(&self) -> &[NodeName] {
        &self.expected_nodes
    }

    pub fn responding_nodes(&self) -> Vec<NodeName> {
        let inner = self.inner.lock().expect("response state poisoned");
        inner.responses.iter().map(|r| r.executor.clone()).collect()
    }

    pub fn local_node_responded(&self) -> bool {
        self.inner
            .lock()
            .expect("response state poisoned")
            .local_received
    }

    /// Restart the deadline clock; called right after the broadcast
    /// unlock.
    pub fn arm(&self) {
        self.inner
            .lock()
            .expect("response state poisoned")
            .armed_at = Instant::now();
    }

    /// Whether the request's total lifetime has elapsed (purge check).
    pub fn is_expired(&self) -> bool {
        let armed_at = self
            .inner
            .lock()
            .expect("response state poisoned")
            .armed_at;
        armed_at.elapsed() >= self.total_timeout
    }

    fn threshold_met(&self, inner: &Inner) -> bool {
        inner.responses.len() >= self.expected_sync && (!self.wait_local || inner.local_received)
    }

    /// Record a node's response. Returns `true` once every expected node
    /// has responded, which tells the message service to drop the
    /// registration.
    pub fn on_response(&self, response: ReplicationResponse) -> bool {
        let mut inner = self.inner.lock().expect("response state poisoned");

        if !self.expected_nodes.contains(&response.executor) {
            warn!(
                request = %self.request_id,
                node = %response.executor,
                "response from a node outside the dispatch target set"
            );
            return false;
        }
        if inner
            .responses
            .iter()
            .any(|r| r.executor == response.executor)
        {
            debug!(
                request = %self.request_id,
                node = %response.executor,
                "duplicate response ignored"
            );
            return false;
        }

        if response.executor == self.local_node {
            inner.local_received = true;
        }
        inner.responses.push(response);

        let complete = inner.responses.len() >= self.expected_nodes.len();
        drop(inner);
        // Every accepted response wakes the waiter: past the synchronous
        // deadline a single response is enough to return best-effort.
        // notify_one stores a permit, so a response that lands between
        // the waiter's check and its next park is not lost.
        self.progress.notify_one();
        complete
    }

    /// Block until the synchronous threshold is met, the synchronous
    /// deadline passes with at least one response on hand, or the total
    /// deadline passes with nothing usable.
    ///
    /// A missed synchronous deadline surfaces as
    /// [`ReplicationError::SynchronousTimeout`]; the dispatcher treats
    /// it as non-fatal and reduces whatever arrived.
    pub async fn wait_for_synchronous_responses(&self) -> ReplicationResult<()> {
        loop {
            let (sync_deadline, total_deadline, has_any) = {
                let inner = self.inner.lock().expect("response state poisoned");
                if self.threshold_met(&inner) {
                    return Ok(());
                }
                (
                    inner.armed_at + self.sync_timeout,
                    inner.armed_at + self.total_timeout,
                    !inner.responses.is_empty(),
                )
            };

            let now = Instant::now();
            if now >= total_deadline {
                return Err(ReplicationError::TotalTimeout {
                    request_id: self.request_id.to_string(),
                });
            }
            if now >= sync_deadline && has_any {
                return Err(ReplicationError::SynchronousTimeout {
                    timeout_ms: self.sync_timeout.as_millis() as u64,
                });
            }

            // Past the synchronous deadline with nothing on hand we keep
            // waiting for a first response until the total deadline.
            let next_deadline = if now >= sync_deadline {
                total_deadline
            } else {
                sync_deadline.min(total_deadline)
            };
            let _ = timeout_at(next_deadline, self.progress.notified()).await;
        }
    }

    /// Reduce the collected responses with the task's result strategy.
    pub fn reduce(&self, strategy: ResultStrategy) -> ReplicationResult<Value> {
        let inner = self.inner.lock().expect("response state poisoned");

        let successes: Vec<(&NodeName, &Value)> = inner
            .responses
            .iter()
            .filter_map(|r| r.payload.as_ref().ok().map(|v| (&r.executor, v)))
            .collect();

        if successes.is_empty() {
            return match inner
                .responses
                .iter()
                .find_map(|r| r.payload.as_ref().err().map(|e| (&r.executor, e)))
            {
                Some((node, message)) => Err(ReplicationError::TaskFailed {
                    node: node.to_string(),
                    message: message.clone(),
                }),
                None => Err(ReplicationError::TotalTimeout {
                    request_id: self.request_id.to_string(),
                }),
            };
        }

        let reduced = match strategy {
            ResultStrategy::First | ResultStrategy::Any => successes[0].1.clone(),
            ResultStrategy::Majority => majority_payload(&successes),
            ResultStrategy::Union => union_payload(&successes),
        };
        Ok(reduced)
    }
}

/// Modal payload by JSON value equality; ties broken by payload hash,
/// then by the name of the first responder that produced the payload.
fn majority_payload(successes: &[(&NodeName, &Value)]) -> Value {
    // serde_json maps are sorted, so the rendered string is canonical.
    let mut groups: HashMap<String, (usize, &NodeName, &Value)> = HashMap::new();
    for &(node, value) in successes {
        let key = value.to_string();
        groups
            .entry(key)
            .and_modify(|(count, _, _)| *count += 1)
            .or_insert((1, node, value));
    }

    let mut candidates: Vec<(usize, u64, &NodeName, &Value)> = groups
        .into_iter()
        .map(|(key, (count, node, value))| {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (count, hasher.finish(), node, value)
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.as_str().cmp(b.2.as_str()))
    });
    candidates[0].3.clone()
}

/// Arrival-order merge: array payloads are flattened, scalars appended.
fn union_payload(successes: &[(&NodeName, &Value)]) -> Value {
    let mut merged = Vec::new();
    for &(_, value) in successes {
        match value {
            Value::Array(items) => merged.extend(items.iter().cloned()),
            other => merged.push(other.clone()),
        }
    }
    Value::Array(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str) -> NodeName {
        NodeName::new(name)
    }

    fn manager(expected_sync: usize, wait_local: bool) -> ResponseManager {
        ResponseManager::new(
            RequestId::new(node("n1"), 1),
            vec![node("n1"), node("n2"), node("n3")],
            expected_sync,
            2,
            wait_local,
            node("n1"),
            Duration::from_millis(200),
            Duration::from_millis(500),
        )
    }

    fn response(from: &str, payload: Value) -> ReplicationResponse {
        ReplicationResponse::success(
            RequestId::new(node("n1"), 1),
            node(from),
            node("n1"),
            payload,
        )
    }

    fn error_response(from: &str, message: &str) -> ReplicationResponse {
        ReplicationResponse::failure(
            RequestId::new(node("n1"), 1),
            node(from),
            node("n1"),
            message.to_string(),
        )
    }

    #[tokio::test]
    async fn test_threshold_met_after_expected_sync() {
        let mgr = manager(2, false);
        mgr.on_response(response("n2", json!(1)));
        mgr.on_response(response("n3", json!(1)));
        mgr.wait_for_synchronous_responses().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_unblocks_on_late_threshold() {
        let mgr = std::sync::Arc::new(manager(1, false));
        let waiter = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.wait_for_synchronous_responses().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.on_response(response("n2", json!("late")));
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_local_blocks_until_local_response() {
        let mgr = manager(1, true);
        mgr.on_response(response("n2", json!(1)));

        // Remote quorum alone is not enough with read-your-writes on.
        let err = mgr.wait_for_synchronous_responses().await.unwrap_err();
        assert!(matches!(err, ReplicationError::SynchronousTimeout { .. }));

        mgr.arm();
        mgr.on_response(response("n1", json!(1)));
        mgr.wait_for_synchronous_responses().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_timeout_carries_the_deadline() {
        let mgr = manager(3, false);
        mgr.on_response(response("n2", json!(1)));
        // Only one of three expected responses when the deadline hits.
        let err = mgr.wait_for_synchronous_responses().await.unwrap_err();
        match err {
            ReplicationError::SynchronousTimeout { timeout_ms } => assert_eq!(timeout_ms, 200),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_total_timeout_with_no_responses() {
        let mgr = manager(2, false);
        let err = mgr.wait_for_synchronous_responses().await.unwrap_err();
        assert!(matches!(err, ReplicationError::TotalTimeout { .. }));
    }

    #[test]
    fn test_duplicate_and_unexpected_responses_ignored() {
        let mgr = manager(2, false);
        mgr.on_response(response("n2", json!(1)));
        mgr.on_response(response("n2", json!(2)));
        mgr.on_response(response("intruder", json!(3)));
        assert_eq!(mgr.responding_nodes(), vec![node("n2")]);
    }

    #[test]
    fn test_on_response_reports_completion() {
        let mgr = manager(2, false);
        assert!(!mgr.on_response(response("n1", json!(1))));
        assert!(!mgr.on_response(response("n2", json!(1))));
        assert!(mgr.on_response(response("n3", json!(1))));
    }

    #[test]
    fn test_reduce_first_takes_arrival_order() {
        let mgr = manager(2, false);
        mgr.on_response(error_response("n2", "boom"));
        mgr.on_response(response("n3", json!("from-n3")));
        mgr.on_response(response("n1", json!("from-n1")));
        assert_eq!(
            mgr.reduce(ResultStrategy::First).unwrap(),
            json!("from-n3")
        );
    }

    #[test]
    fn test_reduce_majority_picks_modal_payload() {
        let mgr = manager(3, false);
        mgr.on_response(response("n1", json!({"v": 1})));
        mgr.on_response(response("n2", json!({"v": 2})));
        mgr.on_response(response("n3", json!({"v": 1})));
        assert_eq!(
            mgr.reduce(ResultStrategy::Majority).unwrap(),
            json!({"v": 1})
        );
    }

    #[test]
    fn test_reduce_majority_tie_break_is_deterministic() {
        let build = |order: &[(&str, i32)]| {
            let mgr = manager(2, false);
            for (from, v) in order {
                mgr.on_response(response(from, json!({ "v": v })));
            }
            mgr.reduce(ResultStrategy::Majority).unwrap()
        };
        let a = build(&[("n1", 1), ("n2", 2)]);
        let b = build(&[("n2", 2), ("n1", 1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reduce_union_flattens_arrays() {
        let mgr = manager(3, false);
        mgr.on_response(response("n1", json!([{"a": 1}])));
        mgr.on_response(response("n2", json!([{"b": 2}])));
        mgr.on_response(response("n3", json!([{"c": 3}])));
        assert_eq!(
            mgr.reduce(ResultStrategy::Union).unwrap(),
            json!([{"a": 1}, {"b": 2}, {"c": 3}])
        );
    }

    #[test]
    fn test_reduce_union_keeps_scalars() {
        let mgr = manager(2, false);
        mgr.on_response(response("n1", json!(1)));
        mgr.on_response(response("n2", json!([2, 3])));
        assert_eq!(mgr.reduce(ResultStrategy::Union).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_reduce_all_errors_surfaces_task_failure() {
        let mgr = manager(2, false);
        mgr.on_response(error_response("n2", "record not found: r1"));
        let err = mgr.reduce(ResultStrategy::First).unwrap_err();
        match err {
            ReplicationError::TaskFailed { node, message } => {
                assert_eq!(node, "n2");
                assert!(message.contains("r1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_expiry_tracks_total_timeout() {
        let mgr = manager(2, false);
        assert!(!mgr.is_expired());
    }
}
