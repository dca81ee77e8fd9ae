//! Error types for partition handling
//!
//! Admission errors are returned to the caller unchanged; retry policy belongs
//! to the client. RPC errors only surface inside partial transaction completion,
//! where they are logged and the transaction stays pending.

use crate::topology::Address;

/// Errors raised by the partition handling layer
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Not all owners of the key are reachable under the current policy
    #[error("key '{key}' is not available: not all of its owners are in this partition")]
    KeyUnavailable { key: String },
    /// Same as `KeyUnavailable`, but the read asked for a write lock
    #[error("cannot acquire lock on key '{key}': not all of its owners are in this partition")]
    LockUnavailable { key: String },
    /// Bulk clear while the cache is not available
    #[error("cannot clear the cache while the cluster is partitioned")]
    ClearDisallowed,
    /// Bulk read while the cache is not available
    #[error("cluster is operating in degraded mode because of node failures")]
    PartitionDegraded,
    /// Unknown or unsupported partition handling setting
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

/// Errors returned by the transport when completing partial transactions
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("remote invocation timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("node {node} failed: {message}")]
    Remote { node: Address, message: String },
}

pub type Result<T> = std::result::Result<T, PartitionError>;
