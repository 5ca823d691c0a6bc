//! Local replica store contract and the in-memory document store.
//!
//! The coordinator applies every inbound task through [`ReplicaStore`];
//! it never touches documents itself. The [`ExecutionContext`] handed to
//! `execute` tells the store who initiated the operation; stores must
//! not re-broadcast writes that arrive with [`RunMode::Replication`].
//!
//! [`MemoryStore`] is the reference implementation: a versioned
//! in-memory document store whose mutations are idempotent under the
//! single-replay guarantee of the undo protocol (a crash can replay the
//! last in-flight task exactly once).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use thiserror::Error as ThisError;
use tracing::debug;

use super::task::{ExecutionContext, RemoteTask, RunMode};

/// Failures of the local replica.
#[derive(Debug, Clone, ThisError)]
pub enum StoreError {
    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("record already exists: {0}")]
    DuplicateRecord(String),

    #[error("version conflict on record '{record_id}': expected {expected}, found {found}")]
    VersionConflict {
        record_id: String,
        expected: u64,
        found: u64,
    },

    #[error("command failed: {0}")]
    Command(String),

    #[error("store is closed")]
    Closed,
}

/// The document store a coordinator replicates onto.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Apply one task and return its serializable result.
    async fn execute(
        &self,
        task: &RemoteTask,
        ctx: &ExecutionContext,
    ) -> Result<Value, StoreError>;

    /// Drop the store's object cache; called after every inbound task so
    /// locally cached documents never shadow a replicated write.
    fn clear_object_cache(&self);

    /// Release the store; subsequent `execute` calls fail.
    async fn close(&self);
}

#[derive(Debug, Clone, PartialEq)]
struct StoredRecord {
    version: u64,
    document: Value,
}

/// Versioned in-memory document store.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<String, StoredRecord>,
    cache_clears: AtomicU64,
    mutations: AtomicU64,
    closed: AtomicBool,
    last_run_mode: Mutex<Option<RunMode>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current (version, document) of a record, if present.
    pub fn record(&self, record_id: &str) -> Option<(u64, Value)> {
        self.records
            .get(record_id)
            .map(|r| (r.version, r.document.clone()))
    }

    /// Number of mutations actually applied (idempotent replays excluded).
    pub fn mutations_applied(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    pub fn cache_clears(&self) -> u64 {
        self.cache_clears.load(Ordering::Relaxed)
    }

    /// Run mode of the most recent `execute` call.
    pub fn last_run_mode(&self) -> Option<RunMode> {
        *self.last_run_mode.lock().expect("run-mode mutex poisoned")
    }

    fn create(&self, record_id: &str, document: &Value) -> Result<Value, StoreError> {
        if let Some(existing) = self.records.get(record_id) {
            // A replayed create carries the same document: report the
            // stored state instead of failing.
            if existing.document == *document {
                return Ok(json!({ "record_id": record_id, "version": existing.version }));
            }
            return Err(StoreError::DuplicateRecord(record_id.to_string()));
        }
        self.records.insert(
            record_id.to_string(),
            StoredRecord {
                version: 1,
                document: document.clone(),
            },
        );
        self.mutations.fetch_add(1, Ordering::Relaxed);
        Ok(json!({ "record_id": record_id, "version": 1 }))
    }

    fn read(&self, record_id: &str) -> Result<Value, StoreError> {
        let record = self
            .records
            .get(record_id)
            .ok_or_else(|| StoreError::RecordNotFound(record_id.to_string()))?;
        Ok(json!({
            "record_id": record_id,
            "version": record.version,
            "document": record.document,
        }))
    }

    fn update(&self, record_id: &str, document: &Value, version: u64) -> Result<Value, StoreError> {
        let mut record = self
            .records
            .get_mut(record_id)
            .ok_or_else(|| StoreError::RecordNotFound(record_id.to_string()))?;

        if record.version == version {
            record.version += 1;
            record.document = document.clone();
            self.mutations.fetch_add(1, Ordering::Relaxed);
            return Ok(json!({ "record_id": record_id, "version": record.version }));
        }
        // A replayed update has already bumped the version and stored
        // this exact document.
        if record.version == version + 1 && record.document == *document {
            return Ok(json!({ "record_id": record_id, "version": record.version }));
        }
        Err(StoreError::VersionConflict {
            record_id: record_id.to_string(),
            expected: version,
            found: record.version,
        })
    }

    fn delete(&self, record_id: &str, version: u64) -> Result<Value, StoreError> {
        match self.records.get(record_id).map(|r| r.version) {
            // Already gone: a replayed delete is a success.
            None => Ok(json!({ "record_id": record_id, "deleted": true })),
            Some(found) if found == version => {
                self.records.remove(record_id);
                self.mutations.fetch_add(1, Ordering::Relaxed);
                Ok(json!({ "record_id": record_id, "deleted": true }))
            }
            Some(found) => Err(StoreError::VersionConflict {
                record_id: record_id.to_string(),
                expected: version,
                found,
            }),
        }
    }

    fn command(&self, statement: &str) -> Result<Value, StoreError> {
        match statement.trim() {
            "select" => {
                let mut rows: Vec<(String, StoredRecord)> = self
                    .records
                    .iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect();
                rows.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(Value::Array(
                    rows.into_iter()
                        .map(|(record_id, record)| {
                            json!({
                                "record_id": record_id,
                                "version": record.version,
                                "document": record.document,
                            })
                        })
                        .collect(),
                ))
            }
            "count" => Ok(json!([{ "count": self.records.len() }])),
            other => Err(StoreError::Command(format!(
                "unsupported statement: '{other}'"
            ))),
        }
    }
}

#[async_trait]
impl ReplicaStore for MemoryStore {
    async fn execute(
        &self,
        task: &RemoteTask,
        ctx: &ExecutionContext,
    ) -> Result<Value, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        *self.last_run_mode.lock().expect("run-mode mutex poisoned") = Some(ctx.run_mode);

        match task {
            RemoteTask::CreateRecord {
                record_id,
                document,
            } => self.create(record_id, document),
            RemoteTask::ReadRecord { record_id } => self.read(record_id),
            RemoteTask::UpdateRecord {
                record_id,
                document,
                version,
            } => self.update(record_id, document, *version),
            RemoteTask::DeleteRecord { record_id, version } => self.delete(record_id, *version),
            RemoteTask::Command { statement } => self.command(statement),
            RemoteTask::Resync => {
                debug!(database = %ctx.database, sender = %ctx.sender, "resync probe");
                Ok(json!({ "records": self.records.len() }))
            }
        }
    }

    fn clear_object_cache(&self) {
        self.cache_clears.fetch_add(1, Ordering::Relaxed);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
