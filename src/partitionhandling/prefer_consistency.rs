//! Strategy that favours consistency over uptime
//!
//! The cache enters degraded mode as soon as a membership change may have lost
//! data or left this partition in a minority. It only becomes available again
//! after a merge or a manual change, never on its own.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::context::AvailabilityStrategyContext;
use super::lost_data::{DistLostDataCheck, LostDataCheck};
use super::strategy::{check_membership, retain_members, AvailabilityStrategy, MembershipCheck};
use super::AvailabilityMode;
use crate::events::{EventLogCategory, EventLogger};
use crate::topology::{Address, CacheStatusResponse, CacheTopology, Phase};

pub struct PreferConsistencyStrategy {
    events: Arc<dyn EventLogger>,
    lost_data_check: Arc<dyn LostDataCheck>,
}

impl PreferConsistencyStrategy {
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

    fn check_for_lost_data(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        new_members: Vec<Address>,
    ) {
        let cache_name = context.cache_name().to_string();
        if new_members.is_empty() {
            debug!(cache = %cache_name, "Cache lost all of its members");
            context.update_current_topology(&new_members);
            return;
        }

        let mode = context.availability_mode();
        if mode != AvailabilityMode::Available {
            debug!(cache = %cache_name, mode = %mode, members = ?new_members, "Cache is not available, updating actual members only");
            context.update_availability_mode(&new_members, mode, false);
            return;
        }

        if let Some(stable) = context.stable_topology() {
            if self.log_membership_check(&cache_name, &stable, &new_members) {
                context.update_availability_mode(&new_members, AvailabilityMode::DegradedMode, true);
                return;
            }
        }

        debug!(cache = %cache_name, members = ?new_members, "No data lost, updating topology");
        context.update_current_topology(&new_members);
        let expected = context.expected_members();
        context.queue_rebalance(&expected);
    }

    /// Returns `true` when the cache must enter degraded mode
    fn log_membership_check(
        &self,
        cache_name: &str,
        stable: &CacheTopology,
        new_members: &[Address],
    ) -> bool {
        let stable_members = stable.members();
        match check_membership(self.lost_data_check.as_ref(), stable, new_members) {
            MembershipCheck::Intact => false,
            MembershipCheck::DataLost => {
                self.events.error(
                    EventLogCategory::Cluster,
                    cache_name,
                    format!(
                        "Lost data because of graceful leaver or abrupt leavers, entering degraded mode. Stable members: {:?}, remaining members: {:?}",
                        stable_members, new_members
                    ),
                );
                true
            }
            MembershipCheck::Minority => {
                self.events.error(
                    EventLogCategory::Cluster,
                    cache_name,
                    format!(
                        "Lost at least half of the stable members, possible split brain causing data inconsistency. Entering degraded mode. Stable members: {:?}, remaining members: {:?}",
                        stable_members, new_members
                    ),
                );
                true
            }
        }
    }
}

impl AvailabilityStrategy for PreferConsistencyStrategy {
    fn name(&self) -> &'static str {
        "prefer-consistency"
    }

    fn on_join(&self, context: &mut dyn AvailabilityStrategyContext, joiner: &Address) {
        if context.availability_mode() != AvailabilityMode::Available {
            debug!(
                cache = %context.cache_name(),
                joiner = %joiner,
                "Cache is not available, postponing rebalance"
            );
            return;
        }
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
        self.check_for_lost_data(context, new_members);
    }

    fn on_cluster_view_change(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        cluster_members: &[Address],
    ) {
        let Some(current) = context.current_topology() else {
            debug!(cache = %context.cache_name(), "No topology installed, ignoring view change");
            return;
        };
        let new_members = retain_members(&current.members(), cluster_members);
        self.check_for_lost_data(context, new_members);
    }

    fn on_partition_merge(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        responses: &HashMap<Address, CacheStatusResponse>,
    ) {
        let cache_name = context.cache_name().to_string();
        let expected = context.expected_members();

        let mut senders: Vec<&Address> = responses.keys().collect();
        senders.sort();

        let mut max_topology_id: Option<i32> = None;
        let mut max_rebalance_id: Option<i32> = None;
        let mut max_stable: Option<&CacheTopology> = None;
        let mut max_active: Option<&CacheTopology> = None;
        let mut max_degraded: Option<&CacheTopology> = None;
        let mut degraded: Vec<&CacheTopology> = Vec::new();

        for sender in senders {
            let response = &responses[sender];
            if let Some(stable) = &response.stable_topology {
                if max_stable.map_or(true, |max| max.topology_id < stable.topology_id) {
                    max_stable = Some(stable);
                }
            }

            let Some(topology) = &response.cache_topology else {
                debug!(cache = %cache_name, sender = %sender, "Sender has no topology");
                continue;
            };
            max_topology_id = max_topology_id.max(Some(topology.topology_id));
            max_rebalance_id = max_rebalance_id.max(Some(topology.rebalance_id));

            match response.availability_mode {
                AvailabilityMode::Available => {
                    if max_active.map_or(true, |max| max.topology_id < topology.topology_id) {
                        max_active = Some(topology);
                    }
                }
                mode => {
                    if mode == AvailabilityMode::Unavailable {
                        warn!(cache = %cache_name, sender = %sender, "Sender reported an unavailable cache, treating its topology as degraded");
                    }
                    if max_degraded.map_or(true, |max| max.topology_id < topology.topology_id) {
                        max_degraded = Some(topology);
                    }
                    if !degraded.contains(&topology) {
                        degraded.push(topology);
                    }
                }
            }
        }

        let (winner, merged_mode) = if let Some(active) = max_active {
            debug!(cache = %cache_name, topology = %active, "Found active topology");
            (Some(active), AvailabilityMode::Available)
        } else if let Some(topology) = max_degraded {
            if degraded.len() > 1 {
                info!(
                    cache = %cache_name,
                    partitions = degraded.len(),
                    "Merging degraded partitions with different topologies, keeping the most recent one"
                );
            }
            (Some(topology), AvailabilityMode::DegradedMode)
        } else {
            debug!(cache = %cache_name, "No active or degraded topology found, only joiners recovered");
            (None, AvailabilityMode::Available)
        };

        if let Some(winner) = winner {
            let merged = CacheTopology::new(
                max_topology_id.unwrap_or(winner.topology_id) + 1,
                max_rebalance_id.unwrap_or(winner.rebalance_id) + 1,
                winner.read_consistent_hash().into_owned(),
                None,
                Phase::NoRebalance,
                retain_members(&winner.members(), &expected),
            );
            info!(cache = %cache_name, topology = %merged, mode = %merged_mode, "Installing merged topology");
            context.update_topologies_after_merge(
                Some(merged),
                max_stable.cloned(),
                Some(merged_mode),
                false,
            );
        }

        let stay_degraded = if context.is_manually_degraded() {
            debug!(cache = %cache_name, "Cache was manually degraded, staying degraded after merge");
            true
        } else if let Some(stable) = max_stable {
            self.log_membership_check(&cache_name, stable, &expected)
        } else {
            false
        };

        if stay_degraded {
            context.update_availability_mode(&expected, AvailabilityMode::DegradedMode, true);
            return;
        }

        if merged_mode != AvailabilityMode::Available {
            self.events.info(
                EventLogCategory::Cluster,
                &cache_name,
                format!("Recovered all stable members after merge, becoming available. Members: {:?}", expected),
            );
            context.update_availability_mode(&expected, AvailabilityMode::Available, false);
        }
        context.queue_rebalance(&expected);
    }

    fn on_rebalance_end(&self, context: &mut dyn AvailabilityStrategyContext) {
        debug!(
            cache = %context.cache_name(),
            mode = %context.availability_mode(),
            "Rebalance finished, availability only changes on merge or manual request"
        );
    }

    fn on_manual_availability_change(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        mode: AvailabilityMode,
    ) {
        let expected = context.expected_members();
        let actual_members = context
            .current_topology()
            .map(|topology| topology.actual_members)
            .unwrap_or_else(|| expected.clone());

        self.events.info(
            EventLogCategory::Cluster,
            context.cache_name(),
            format!("Availability mode manually changed to {}", mode),
        );
        context.manually_update_availability_mode(
            &actual_members,
            mode,
            mode != AvailabilityMode::Available,
        );

        if mode == AvailabilityMode::Available {
            context.update_current_topology(&expected);
            context.queue_rebalance(&expected);
        }
    }
}
