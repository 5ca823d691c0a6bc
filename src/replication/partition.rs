//! Per-database replication configuration and partition resolution.
//!
//! A database is split into named shards (logical clusters of records),
//! each owned by an ordered set of nodes with its own quorum and
//! read-policy knobs. The `"*"` shard is the fallback for records not
//! assigned to a named shard; every lookup for an unknown shard lands
//! there.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::DEFAULT_SHARD;
use crate::fabric::FabricResult;
use crate::types::{DatabaseName, NodeName, ShardName};

/// Knobs of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Ordered set of nodes owning the shard.
    pub nodes: Vec<NodeName>,
    /// Acknowledgements required for a read dispatch.
    pub read_quorum: usize,
    /// Acknowledgements required for a write dispatch.
    pub write_quorum: usize,
    /// Whether a dispatch that targets the local node must also wait for
    /// the local response before declaring the quorum met.
    pub read_your_writes: bool,
    /// Strict availability policy: fail a dispatch whose quorum exceeds
    /// the target set instead of downgrading the quorum.
    pub fail_when_available_less_than_quorum: bool,
    /// Name of the partitioning strategy used to resolve targets.
    pub strategy: String,
}

impl ShardConfig {
    pub fn new(nodes: Vec<NodeName>) -> Self {
        Self {
            nodes,
            read_quorum: 1,
            write_quorum: 2,
            read_your_writes: true,
            fail_when_available_less_than_quorum: false,
            strategy: ConfiguredPartitioning::NAME.to_string(),
        }
    }

    pub fn with_read_quorum(mut self, quorum: usize) -> Self {
        self.read_quorum = quorum;
        self
    }

    pub fn with_write_quorum(mut self, quorum: usize) -> Self {
        self.write_quorum = quorum;
        self
    }

    pub fn with_read_your_writes(mut self, enabled: bool) -> Self {
        self.read_your_writes = enabled;
        self
    }

    pub fn with_strict_quorum(mut self, enabled: bool) -> Self {
        self.fail_when_available_less_than_quorum = enabled;
        self
    }
}

/// Replication configuration of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub database: DatabaseName,
    shards: BTreeMap<ShardName, ShardConfig>,
    /// Anti-entropy interval in seconds; 0 disables the resync timer.
    resync_every_secs: u64,
}

impl DatabaseConfig {
    /// Build a configuration with the given default (`"*"`) shard.
    pub fn new(database: DatabaseName, default_shard: ShardConfig) -> Self {
        let mut shards = BTreeMap::new();
        shards.insert(ShardName::new(DEFAULT_SHARD), default_shard);
        Self {
            database,
            shards,
            resync_every_secs: 0,
        }
    }

    pub fn with_shard(mut self, name: impl Into<String>, config: ShardConfig) -> Self {
        self.shards.insert(ShardName::new(name), config);
        self
    }

    pub fn with_resync_every(mut self, secs: u64) -> Self {
        self.resync_every_secs = secs;
        self
    }

    /// The shard's config, falling back to the default shard.
    pub fn shard(&self, shard: Option<&ShardName>) -> &ShardConfig {
        shard
            .and_then(|name| self.shards.get(name))
            .unwrap_or_else(|| {
                self.shards
                    .get(&ShardName::new(DEFAULT_SHARD))
                    .expect("default shard always present")
            })
    }

    pub fn read_quorum(&self, shard: Option<&ShardName>) -> usize {
        self.shard(shard).read_quorum
    }

    pub fn write_quorum(&self, shard: Option<&ShardName>) -> usize {
        self.shard(shard).write_quorum
    }

    pub fn read_your_writes(&self, shard: Option<&ShardName>) -> bool {
        self.shard(shard).read_your_writes
    }

    pub fn fail_when_available_less_than_quorum(&self, shard: Option<&ShardName>) -> bool {
        self.shard(shard).fail_when_available_less_than_quorum
    }

    pub fn partition_strategy(&self, shard: Option<&ShardName>) -> &str {
        &self.shard(shard).strategy
    }

    pub fn resync_every(&self) -> Option<Duration> {
        (self.resync_every_secs > 0).then(|| Duration::from_secs(self.resync_every_secs))
    }

    pub fn shard_names(&self) -> impl Iterator<Item = &ShardName> {
        self.shards.keys()
    }

    /// Add `node` to every shard missing it; returns the shards touched.
    pub fn add_node_to_partitions(&mut self, node: &NodeName) -> Vec<ShardName> {
        let mut touched = Vec::new();
        for (name, shard) in self.shards.iter_mut() {
            if !shard.nodes.contains(node) {
                shard.nodes.push(node.clone());
                touched.push(name.clone());
            }
        }
        touched
    }

    /// Remove `node` from every shard; returns the shards touched.
    ///
    /// Without `force`, a shard keeps the node when removing it would
    /// leave fewer owners than its write quorum, so a transient departure
    /// cannot silently make the partition unwritable.
    pub fn remove_node_from_partitions(&mut self, node: &NodeName, force: bool) -> Vec<ShardName> {
        let mut touched = Vec::new();
        for (name, shard) in self.shards.iter_mut() {
            if !shard.nodes.contains(node) {
                continue;
            }
            if !force && shard.nodes.len() <= shard.write_quorum {
                debug!(
                    shard = %name,
                    node = %node,
                    owners = shard.nodes.len(),
                    write_quorum = shard.write_quorum,
                    "keeping departed node in shard, removal would break the write quorum"
                );
                continue;
            }
            shard.nodes.retain(|n| n != node);
            touched.push(name.clone());
        }
        touched
    }

    pub fn serialize(&self) -> FabricResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn deserialize(bytes: &Bytes) -> FabricResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Resolved target set of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub nodes: Vec<NodeName>,
}

/// Maps (config, shard) to the node set a dispatch targets.
pub trait PartitioningStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn partition(&self, config: &DatabaseConfig, shard: Option<&ShardName>) -> Partition;
}

/// Default strategy: the shard's configured node set, in configured
/// order.
pub struct ConfiguredPartitioning;

impl ConfiguredPartitioning {
    pub const NAME: &'static str = "configured";
}

impl PartitioningStrategy for ConfiguredPartitioning {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn partition(&self, config: &DatabaseConfig, shard: Option<&ShardName>) -> Partition {
        Partition {
            nodes: config.shard(shard).nodes.clone(),
        }
    }
}

/// Resolve a strategy by its configured name.
///
/// Unknown names fall back to [`ConfiguredPartitioning`] with a debug
/// log, so a config written by a newer node never strands an older one.
pub fn strategy_for(name: &str) -> Arc<dyn PartitioningStrategy> {
    if name != ConfiguredPartitioning::NAME {
        debug!(strategy = name, "unknown partitioning strategy, using configured node set");
    }
    Arc::new(ConfiguredPartitioning)
}
