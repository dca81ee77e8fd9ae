//! Partition handling and split-brain resolution
//!
//! This module decides, on every membership change of a clustered cache, whether
//! the cache keeps serving requests, and reconciles topologies and partially
//! committed transactions once a network partition heals.

pub mod available;
pub mod context;
pub mod lost_data;
pub mod manager;
pub mod prefer_availability;
pub mod prefer_consistency;
pub mod strategy;
pub mod transaction;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::PartitionError;
use crate::events::EventLogger;
use crate::metrics::PartitionMetrics;
use crate::topology::TopologyProvider;

pub use crate::error::Result;
pub use available::AvailablePartitionHandlingManager;
pub use context::AvailabilityStrategyContext;
pub use lost_data::{DistLostDataCheck, LostDataCheck};
pub use manager::{
    DefaultPartitionHandlingManager, FlagSet, NoopStatusNotifier, PartitionHandlingManager,
    PartitionStatusNotifier, PendingCompletions,
};
pub use prefer_availability::PreferAvailabilityStrategy;
pub use prefer_consistency::PreferConsistencyStrategy;
pub use strategy::AvailabilityStrategy;
pub use transaction::{
    EntryVersion, GlobalTransaction, LockManager, Modification, RemoteCommand, Response,
    TransactionInfo, TransactionRpc,
};

/// Service level of a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AvailabilityMode {
    /// Every operation is allowed
    Available = 0,
    /// Operations are restricted by the partition handling policy
    DegradedMode = 1,
    /// No operation is allowed
    Unavailable = 2,
}

impl AvailabilityMode {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => AvailabilityMode::Available,
            1 => AvailabilityMode::DegradedMode,
            _ => AvailabilityMode::Unavailable,
        }
    }

    /// The least available of two modes
    pub fn least_available(self, other: AvailabilityMode) -> AvailabilityMode {
        if (self as u8) >= (other as u8) {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for AvailabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AvailabilityMode::Available => "AVAILABLE",
            AvailabilityMode::DegradedMode => "DEGRADED_MODE",
            AvailabilityMode::Unavailable => "UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// What a cache may still do while the cluster is split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionHandlingPolicy {
    /// Keep serving reads and writes in every partition
    AllowReadWrites,
    /// Serve reads of keys with a reachable owner, writes only with all owners
    AllowReads,
    /// Serve only keys whose owners are all reachable
    DenyReadWrites,
}

impl PartitionHandlingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionHandlingPolicy::AllowReadWrites => "ALLOW_READ_WRITES",
            PartitionHandlingPolicy::AllowReads => "ALLOW_READS",
            PartitionHandlingPolicy::DenyReadWrites => "DENY_READ_WRITES",
        }
    }
}

impl fmt::Display for PartitionHandlingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionHandlingPolicy {
    type Err = PartitionError;

    /// Accepts `ALLOW_READ_WRITES`, `allow-read-writes` and similar spellings
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "ALLOW_READ_WRITES" => Ok(PartitionHandlingPolicy::AllowReadWrites),
            "ALLOW_READS" => Ok(PartitionHandlingPolicy::AllowReads),
            "DENY_READ_WRITES" => Ok(PartitionHandlingPolicy::DenyReadWrites),
            _ => Err(PartitionError::ConfigurationError(format!(
                "unknown partition handling policy '{}'",
                s
            ))),
        }
    }
}

/// Build the availability strategy matching the configured policy
pub fn availability_strategy(
    config: &CacheConfig,
    events: Arc<dyn EventLogger>,
) -> Box<dyn AvailabilityStrategy> {
    match config.partition_handling.when_split {
        PartitionHandlingPolicy::AllowReadWrites => {
            Box::new(PreferAvailabilityStrategy::new(events))
        }
        PartitionHandlingPolicy::AllowReads | PartitionHandlingPolicy::DenyReadWrites => {
            Box::new(PreferConsistencyStrategy::new(events))
        }
    }
}

/// Build the partition handling manager matching the configured policy.
///
/// Caches that keep serving reads and writes during a split get the
/// always-available manager.
pub fn partition_handling_manager(
    config: &CacheConfig,
    topology: Arc<dyn TopologyProvider>,
    rpc: Arc<dyn TransactionRpc>,
    locks: Arc<dyn LockManager>,
    notifier: Arc<dyn PartitionStatusNotifier>,
    events: Arc<dyn EventLogger>,
    metrics: Arc<PartitionMetrics>,
) -> Arc<dyn PartitionHandlingManager> {
    match config.partition_handling.when_split {
        PartitionHandlingPolicy::AllowReadWrites => Arc::new(AvailablePartitionHandlingManager),
        policy => Arc::new(DefaultPartitionHandlingManager::new(
            config.cache_name.clone(),
            policy,
            config.transaction.versioned,
            topology,
            rpc,
            locks,
            notifier,
            events,
            metrics,
        )),
    }
}
