//! View of the topology coordinator exposed to availability strategies
//!
//! The coordinator owns the per-cache topology bookkeeping. Strategies read
//! from it and commit every decision back through it; they never keep state of
//! their own. Calls for one cache are serialized by the coordinator, so the
//! mutating methods take `&mut self`.

use std::collections::HashMap;

use super::AvailabilityMode;
use crate::topology::{Address, CacheJoinInfo, CacheTopology, ConsistentHash};

pub trait AvailabilityStrategyContext {
    fn cache_name(&self) -> &str;

    /// Join settings of the first member that joined the cache
    fn join_info(&self) -> CacheJoinInfo;

    fn capacity_factors(&self) -> HashMap<Address, f32>;

    /// Topology currently installed by the coordinator
    fn current_topology(&self) -> Option<CacheTopology>;

    /// Last stable topology
    fn stable_topology(&self) -> Option<CacheTopology>;

    fn availability_mode(&self) -> AvailabilityMode;

    /// Members the coordinator expects to see: the cluster view minus leavers,
    /// plus nodes that asked to join
    fn expected_members(&self) -> Vec<Address>;

    /// Start a rebalance towards `new_members` when none is running
    fn queue_rebalance(&mut self, new_members: &[Address]);

    /// Install a new topology restricted to `new_members`, keeping the hash
    fn update_current_topology(&mut self, new_members: &[Address]);

    /// Change the availability mode and install a topology whose actual
    /// members are `actual_members`
    fn update_availability_mode(
        &mut self,
        actual_members: &[Address],
        mode: AvailabilityMode,
        cancel_rebalance: bool,
    );

    /// Same as `update_availability_mode`, but records that an administrator
    /// asked for the change
    fn manually_update_availability_mode(
        &mut self,
        actual_members: &[Address],
        mode: AvailabilityMode,
        cancel_rebalance: bool,
    );

    /// Install the topologies picked after a merge; `None` keeps the mode
    fn update_topologies_after_merge(
        &mut self,
        current: Option<CacheTopology>,
        stable: Option<CacheTopology>,
        mode: Option<AvailabilityMode>,
        resolve_conflicts: bool,
    );

    /// Whether a merge policy is configured
    fn resolve_conflicts_on_merge(&self) -> bool;

    /// Hash that assigns each segment to every plausible owner across the
    /// merged partitions
    fn calculate_conflict_hash(
        &self,
        preferred: &ConsistentHash,
        distinct: &[ConsistentHash],
        actual_members: &[Address],
    ) -> ConsistentHash;

    fn queue_conflict_resolution(&mut self, topology: &CacheTopology, preferred_nodes: &[Address]);

    /// Restart an interrupted conflict resolution after a view change.
    ///
    /// Returns `true` when the restart handled the view change.
    fn restart_conflict_resolution(&mut self, members: &[Address]) -> bool;

    /// Whether an administrator put the cache in degraded mode
    fn is_manually_degraded(&self) -> bool;
}
