pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod metrics;
pub mod partitionhandling;
pub mod topology;

pub use crate::config::{CacheConfig, MergePolicy};
pub use crate::error::{PartitionError, RpcError};
pub use crate::events::{EventLogger, InMemoryEventLog};
pub use crate::metrics::PartitionMetrics;
pub use crate::partitionhandling::{
    availability_strategy, partition_handling_manager, AvailabilityMode, AvailabilityStrategy,
    AvailabilityStrategyContext, PartitionHandlingManager, PartitionHandlingPolicy,
};
pub use crate::topology::{Address, CacheStatusResponse, CacheTopology, ConsistentHash, Phase};
