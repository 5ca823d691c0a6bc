//! Core identifier types used across the coordinator.
//!
//! Everything that names a cluster entity gets a newtype so call sites
//! cannot mix up a node name with a database name. All of them serialize
//! as plain strings on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a cluster node.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(pub String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a replicated database.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseName(pub String);

impl DatabaseName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatabaseName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a logical shard (cluster of records) inside a database.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardName(pub String);

impl ShardName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Cluster-unique request identifier.
///
/// The sequence number is a per-node monotonic counter stamped by the
/// message service at dispatch time, so the pair (node, seq) never
/// collides cluster-wide for the lifetime of a response manager.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestId {
    pub node: NodeName,
    pub seq: u64,
}

impl RequestId {
    pub fn new(node: NodeName, seq: u64) -> Self {
        Self { node, seq }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name_display() {
        let node = NodeName::new("europe0");
        assert_eq!(node.to_string(), "europe0");
        assert_eq!(node.as_str(), "europe0");
    }

    #[test]
    fn test_request_id_display() {
        let id = RequestId::new(NodeName::new("usa1"), 42);
        assert_eq!(id.to_string(), "usa1:42");
    }

    #[test]
    fn test_request_id_uniqueness_per_node() {
        let a = RequestId::new(NodeName::new("n1"), 1);
        let b = RequestId::new(NodeName::new("n1"), 2);
        let c = RequestId::new(NodeName::new("n2"), 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_transparent_strings() {
        let node = NodeName::new("asia2");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, "\"asia2\"");

        let back: NodeName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_request_id_roundtrip() {
        let id = RequestId::new(NodeName::new("n3"), 7);
        let json = serde_json::to_string(&id).unwrap();
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
