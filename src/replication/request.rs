//! Wire envelopes exchanged through the cluster queues.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::RemoteTask;
use crate::types::{DatabaseName, NodeName, RequestId, ShardName};

/// What the sender expects back from a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Wait for the synchronous responses and reduce them.
    Response,
    /// Fire-and-forget: return right after the broadcast.
    NoResponse,
    /// Anti-entropy round; collected like [`ExecutionMode::Response`].
    Resync,
}

impl ExecutionMode {
    /// Whether the dispatcher waits for responses at all.
    pub fn collects_responses(&self) -> bool {
        !matches!(self, ExecutionMode::NoResponse)
    }
}

/// A request broadcast to the request queue of every targeted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationRequest {
    pub id: RequestId,
    /// Stamped by the dispatcher right before the broadcast.
    pub sender: NodeName,
    pub database: DatabaseName,
    pub shard: Option<ShardName>,
    pub task: RemoteTask,
    pub mode: ExecutionMode,
}

impl fmt::Display for ReplicationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}, db={}, from={})",
            self.task.kind(),
            self.id,
            self.database,
            self.sender
        )
    }
}

/// A per-node answer, routed back through the sender's response queue.
///
/// `payload` carries either the task's result or the stringified task
/// failure; a failed task still produces a response so the sender's
/// quorum accounting sees the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationResponse {
    pub request_id: RequestId,
    /// Node that executed the task.
    pub executor: NodeName,
    /// Node the response is addressed to (the original sender).
    pub recipient: NodeName,
    pub payload: Result<Value, String>,
}

impl ReplicationResponse {
    pub fn success(
        request_id: RequestId,
        executor: NodeName,
        recipient: NodeName,
        payload: Value,
    ) -> Self {
        Self {
            request_id,
            executor,
            recipient,
            payload: Ok(payload),
        }
    }

    pub fn failure(
        request_id: RequestId,
        executor: NodeName,
        recipient: NodeName,
        message: String,
    ) -> Self {
        Self {
            request_id,
            executor,
            recipient,
            payload: Err(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.payload.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ReplicationRequest {
        ReplicationRequest {
            id: RequestId::new(NodeName::new("n1"), 7),
            sender: NodeName::new("n1"),
            database: DatabaseName::new("demo"),
            shard: Some(ShardName::new("customers")),
            task: RemoteTask::ReadRecord {
                record_id: "r1".to_string(),
            },
            mode: ExecutionMode::Response,
        }
    }

    #[test]
    fn test_request_roundtrip() {
        let req = request();
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: ReplicationRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_request_display_names_the_task() {
        let req = request();
        let shown = req.to_string();
        assert!(shown.contains("read-record"));
        assert!(shown.contains("n1:7"));
        assert!(shown.contains("db=demo"));
    }

    #[test]
    fn test_execution_mode_collection() {
        assert!(ExecutionMode::Response.collects_responses());
        assert!(ExecutionMode::Resync.collects_responses());
        assert!(!ExecutionMode::NoResponse.collects_responses());
    }

    #[test]
    fn test_response_error_marker_survives_serde() {
        let resp = ReplicationResponse::failure(
            RequestId::new(NodeName::new("n1"), 1),
            NodeName::new("n2"),
            NodeName::new("n1"),
            "version conflict".to_string(),
        );
        let bytes = serde_json::to_vec(&resp).unwrap();
        let back: ReplicationResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!back.is_success());
        assert_eq!(back.payload.unwrap_err(), "version conflict");
    }

    #[test]
    fn test_success_response() {
        let resp = ReplicationResponse::success(
            RequestId::new(NodeName::new("n1"), 1),
            NodeName::new("n2"),
            NodeName::new("n1"),
            json!({"version": 1}),
        );
        assert!(resp.is_success());
    }
}
