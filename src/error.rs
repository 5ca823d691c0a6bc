//! Crate-level errors.
//!
//! The crate uses a two-layer error hierarchy:
//!
//! - [`Error`]: top-level errors surfaced to embedders (configuration,
//!   fabric, replication).
//! - [`crate::replication::ReplicationError`]: dispatch and executor
//!   errors with the full failure taxonomy of the replication protocol.
//! - [`crate::fabric::FabricError`]: failures of the cluster primitives
//!   (queue offers, lock acquisition, codec).
//!
//! Subsystem errors convert upward via `From`, so `?` works across the
//! layers.

use std::result;

use thiserror::Error as ThisError;

use crate::fabric::FabricError;
use crate::replication::ReplicationError;

pub type Result<T> = result::Result<T, Error>;

/// Top-level error surfaced by the coordinator.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A cluster-primitive operation failed.
    #[error(transparent)]
    Fabric(#[from] FabricError),

    /// A replication-protocol operation failed.
    #[error(transparent)]
    Replication(#[from] ReplicationError),
}
