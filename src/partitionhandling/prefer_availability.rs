//! Strategy that keeps the cache available through any split
//!
//! The cache never leaves available mode. On merge the largest surviving
//! partition is picked deterministically, and when a merge policy is configured
//! the other partitions' owners stay write targets until conflicts are resolved.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::context::AvailabilityStrategyContext;
use super::lost_data::{DistLostDataCheck, LostDataCheck};
use super::strategy::{check_membership, retain_members, AvailabilityStrategy, MembershipCheck};
use super::AvailabilityMode;
use crate::events::{EventLogCategory, EventLogger};
use crate::topology::{Address, CacheStatusResponse, CacheTopology, ConsistentHash, Phase};

pub struct PreferAvailabilityStrategy {
    events: Arc<dyn EventLogger>,
    lost_data_check: Arc<dyn LostDataCheck>,
}

/// Nodes that reported the same current and stable topology
#[derive(Debug)]
struct Partition<'a> {
    topology: &'a CacheTopology,
    stable_topology: Option<&'a CacheTopology>,
    senders: Vec<Address>,
}

impl Partition<'_> {
    fn stable_size(&self) -> usize {
        self.stable_topology.map_or(0, |stable| stable.actual_members.len())
    }

    /// Greedy selection order: bigger stable topology, then bigger current
    /// topology on the same stable topology, then more senders
    fn is_better_than(&self, other: &Partition<'_>) -> bool {
        if self.stable_size() != other.stable_size() {
            return self.stable_size() > other.stable_size();
        }
        if self.stable_topology != other.stable_topology {
            return false;
        }
        let size = self.topology.actual_members.len();
        let other_size = other.topology.actual_members.len();
        if size != other_size {
            return size > other_size;
        }
        self.senders.len() > other.senders.len()
    }
}

/// Order merge responses: newest topology first, responses without topology last.
///
/// Ties on topology id fall through to rebalance id, then first member, then a
/// hash of the topology, so every node computes the same total order.
pub fn compare_responses(a: &CacheStatusResponse, b: &CacheStatusResponse) -> Ordering {
    match (&a.cache_topology, &b.cache_topology) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(ta), Some(tb)) => tb
            .topology_id
            .cmp(&ta.topology_id)
            .then_with(|| tb.rebalance_id.cmp(&ta.rebalance_id))
            .then_with(|| ta.members().first().cmp(&tb.members().first()))
            .then_with(|| topology_hash(ta).cmp(&topology_hash(tb))),
    }
}

fn topology_hash(topology: &CacheTopology) -> u64 {
    let mut hasher = DefaultHasher::new();
    topology.hash(&mut hasher);
    hasher.finish()
}

impl PreferAvailabilityStrategy {
    pub fn new(events: Arc<dyn EventLogger>) -> Self {
        Self::with_lost_data_check(events, Arc::new(DistLostDataCheck))
    }

    pub fn with_lost_data_check(
        events: Arc<dyn EventLogger>,
        lost_data_check: Arc<dyn LostDataCheck>,
    ) -> Self {
        Self {
            events,
            lost_data_check,
        }
    }

    /// Warn about data loss or a minority partition; never blocks
    fn warn_on_membership(&self, cache_name: &str, stable: &CacheTopology, new_members: &[Address]) {
        let message = match check_membership(self.lost_data_check.as_ref(), stable, new_members) {
            MembershipCheck::Intact => return,
            MembershipCheck::DataLost => "Lost data because of abrupt leavers, keeping the cache available",
            MembershipCheck::Minority => {
                "Lost at least half of the stable members, possible split brain causing data inconsistency"
            }
        };
        self.events.warn(
            EventLogCategory::Cluster,
            cache_name,
            format!(
                "{}. Stable members: {:?}, remaining members: {:?}",
                message,
                stable.members(),
                new_members
            ),
        );
    }

    fn apply_new_members(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        new_members: Vec<Address>,
    ) {
        if new_members.is_empty() {
            debug!(cache = %context.cache_name(), "Cache lost all of its members");
            context.update_current_topology(&new_members);
            return;
        }
        context.update_current_topology(&new_members);
        context.queue_rebalance(&new_members);
    }
}

impl AvailabilityStrategy for PreferAvailabilityStrategy {
    fn name(&self) -> &'static str {
        "prefer-availability"
    }

    fn on_join(&self, context: &mut dyn AvailabilityStrategyContext, joiner: &Address) {
        debug!(cache = %context.cache_name(), joiner = %joiner, "Queueing rebalance for joiner");
        let expected = context.expected_members();
        context.queue_rebalance(&expected);
    }

    fn on_graceful_leave(&self, context: &mut dyn AvailabilityStrategyContext, leaver: &Address) {
        let Some(current) = context.current_topology() else {
            debug!(cache = %context.cache_name(), leaver = %leaver, "No topology installed, ignoring leave");
            return;
        };
        let new_members: Vec<Address> = current
            .members()
            .into_iter()
            .filter(|member| member != leaver)
            .collect();
        self.apply_new_members(context, new_members);
    }

    fn on_cluster_view_change(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        cluster_members: &[Address],
    ) {
        if context.restart_conflict_resolution(cluster_members) {
            debug!(cache = %context.cache_name(), "Conflict resolution restarted for the new view");
            return;
        }

        let Some(current) = context.current_topology() else {
            debug!(cache = %context.cache_name(), "No topology installed, ignoring view change");
            return;
        };
        let current_members = current.members();
        let new_members = retain_members(&current_members, cluster_members);
        if new_members.len() == current_members.len() {
            debug!(cache = %context.cache_name(), "No cache members left the cluster");
            return;
        }

        if !new_members.is_empty() {
            if let Some(stable) = context.stable_topology() {
                let cache_name = context.cache_name().to_string();
                self.warn_on_membership(&cache_name, &stable, &new_members);
            }
        }
        self.apply_new_members(context, new_members);
    }

    fn on_partition_merge(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        responses: &HashMap<Address, CacheStatusResponse>,
    ) {
        let cache_name = context.cache_name().to_string();
        let expected = context.expected_members();

        let mut sorted: Vec<(&Address, &CacheStatusResponse)> = responses.iter().collect();
        sorted.sort_by(|a, b| compare_responses(a.1, b.1).then_with(|| a.0.cmp(b.0)));

        let mut max_topology_id: i32 = -1;
        let mut max_rebalance_id: i32 = -1;
        let mut partitions: Vec<Partition<'_>> = Vec::new();
        let mut distinct_hashes: Vec<ConsistentHash> = Vec::new();

        for (sender, response) in sorted {
            let Some(topology) = &response.cache_topology else {
                debug!(cache = %cache_name, sender = %sender, "Sender is a joiner without topology");
                continue;
            };
            max_topology_id = max_topology_id.max(topology.topology_id);
            max_rebalance_id = max_rebalance_id.max(topology.rebalance_id);

            if !topology.members().contains(sender) {
                debug!(cache = %cache_name, sender = %sender, "Sender is not a member of its own topology, treating it as a joiner");
                continue;
            }

            let read_hash = topology.read_consistent_hash().into_owned();
            if !distinct_hashes.contains(&read_hash) {
                distinct_hashes.push(read_hash);
            }

            let stable_topology = response.stable_topology.as_ref();
            match partitions
                .iter_mut()
                .find(|p| p.topology == topology && p.stable_topology == stable_topology)
            {
                Some(partition) => partition.senders.push(sender.clone()),
                None => partitions.push(Partition {
                    topology,
                    stable_topology,
                    senders: vec![sender.clone()],
                }),
            }
        }

        let mut chosen: Option<&Partition<'_>> = None;
        for partition in &partitions {
            match chosen {
                Some(best) if !partition.is_better_than(best) => {}
                _ => chosen = Some(partition),
            }
        }

        let Some(chosen) = chosen else {
            debug!(cache = %cache_name, "No partition has a topology, rebalancing over the expected members");
            context.update_current_topology(&expected);
            context.queue_rebalance(&expected);
            return;
        };
        debug!(
            cache = %cache_name,
            topology = %chosen.topology,
            senders = ?chosen.senders,
            partitions = partitions.len(),
            "Selected partition to keep after merge"
        );

        if let Some(stable) = chosen.stable_topology {
            self.warn_on_membership(&cache_name, stable, &expected);
        }

        let stable_members = chosen.stable_topology.map_or(0, |stable| stable.members().len());
        let resolve_conflicts = responses.len() > 1
            && expected.len() > stable_members
            && context.resolve_conflicts_on_merge();

        let preferred = chosen.topology.read_consistent_hash().into_owned();
        if resolve_conflicts {
            let conflict_hash = context.calculate_conflict_hash(&preferred, &distinct_hashes, &expected);
            let merged = CacheTopology::new(
                max_topology_id + 1,
                max_rebalance_id + 1,
                preferred,
                Some(conflict_hash),
                Phase::ConflictResolution,
                expected.clone(),
            );
            self.events.info(
                EventLogCategory::Cluster,
                &cache_name,
                format!(
                    "Starting conflict resolution after merge of {} partitions, preferred nodes: {:?}",
                    partitions.len(),
                    chosen.senders
                ),
            );
            context.update_topologies_after_merge(
                Some(merged.clone()),
                chosen.stable_topology.cloned(),
                None,
                true,
            );
            context.queue_conflict_resolution(&merged, &chosen.senders);
        } else {
            let actual_members = retain_members(&chosen.topology.actual_members, &expected);
            let merged = CacheTopology::new(
                max_topology_id + 1,
                max_rebalance_id + 1,
                preferred,
                None,
                Phase::NoRebalance,
                actual_members.clone(),
            );
            let drops_members = merged.members().iter().any(|member| !actual_members.contains(member));
            info!(cache = %cache_name, topology = %merged, "Installing merged topology");
            context.update_topologies_after_merge(
                Some(merged),
                chosen.stable_topology.cloned(),
                None,
                false,
            );
            if drops_members {
                context.update_current_topology(&actual_members);
            }
        }
        context.queue_rebalance(&expected);
    }

    fn on_rebalance_end(&self, _context: &mut dyn AvailabilityStrategyContext) {}

    fn on_manual_availability_change(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        mode: AvailabilityMode,
    ) {
        warn!(
            cache = %context.cache_name(),
            requested = %mode,
            "Cache is always available, ignoring manual availability change"
        );
    }
}
