//! Availability strategy interface
//!
//! The topology coordinator calls exactly one strategy per cache, one event at
//! a time. A strategy has no result of its own: every decision is committed
//! through the [`AvailabilityStrategyContext`].

use std::collections::HashMap;

use super::context::AvailabilityStrategyContext;
use super::lost_data::LostDataCheck;
use super::AvailabilityMode;
use crate::topology::{Address, CacheStatusResponse, CacheTopology};

pub trait AvailabilityStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// A node asked to join the cache
    fn on_join(&self, context: &mut dyn AvailabilityStrategyContext, joiner: &Address);

    /// A node asked to leave the cache
    fn on_graceful_leave(&self, context: &mut dyn AvailabilityStrategyContext, leaver: &Address);

    /// The cluster view changed without a merge; `cluster_members` is the new view
    fn on_cluster_view_change(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        cluster_members: &[Address],
    );

    /// Sub-clusters merged; one status response per node that answered
    fn on_partition_merge(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        responses: &HashMap<Address, CacheStatusResponse>,
    );

    fn on_rebalance_end(&self, context: &mut dyn AvailabilityStrategyContext);

    /// An administrator changed the availability mode
    fn on_manual_availability_change(
        &self,
        context: &mut dyn AvailabilityStrategyContext,
        mode: AvailabilityMode,
    );
}

/// Result of checking a new membership against the stable topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipCheck {
    Intact,
    /// Some segment lost all of its owners
    DataLost,
    /// At least half of the stable members are gone
    Minority,
}

/// Check `new_members` for data loss, then for minority, against `stable`
pub fn check_membership(
    lost_data_check: &dyn LostDataCheck,
    stable: &CacheTopology,
    new_members: &[Address],
) -> MembershipCheck {
    if lost_data_check.test(&stable.current_ch, new_members) {
        return MembershipCheck::DataLost;
    }
    let stable_members = stable.members();
    let lost = stable_members
        .iter()
        .filter(|member| !new_members.contains(member))
        .count();
    if is_minority_partition(stable_members.len(), lost) {
        MembershipCheck::Minority
    } else {
        MembershipCheck::Intact
    }
}

/// `lost >= ceil(stable_size / 2)`
pub fn is_minority_partition(stable_size: usize, lost: usize) -> bool {
    stable_size > 0 && lost >= stable_size.div_ceil(2)
}

/// Members of `members` that are also in `filter`, in `members` order
pub(crate) fn retain_members(members: &[Address], filter: &[Address]) -> Vec<Address> {
    members
        .iter()
        .filter(|member| filter.contains(member))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitionhandling::DistLostDataCheck;
    use crate::topology::ConsistentHash;

    fn addrs(names: &[&str]) -> Vec<Address> {
        names.iter().map(|n| Address::new(*n)).collect()
    }

    #[test]
    fn test_minority_threshold() {
        assert!(is_minority_partition(5, 3));
        assert!(!is_minority_partition(5, 2));
        assert!(is_minority_partition(4, 2));
        assert!(is_minority_partition(1, 1));
        assert!(!is_minority_partition(1, 0));
        assert!(!is_minority_partition(0, 0));
    }

    #[test]
    fn test_check_membership() {
        let members = addrs(&["A", "B", "C", "D", "E"]);
        // five owners per segment: nothing is lost while one node survives
        let stable = CacheTopology::stable(1, 1, ConsistentHash::round_robin(&members, 10, 5));

        assert_eq!(
            check_membership(&DistLostDataCheck, &stable, &addrs(&["A", "B", "C"])),
            MembershipCheck::Intact
        );
        assert_eq!(
            check_membership(&DistLostDataCheck, &stable, &addrs(&["A", "B"])),
            MembershipCheck::Minority
        );

        let single_owner = CacheTopology::stable(1, 1, ConsistentHash::round_robin(&members, 10, 1));
        assert_eq!(
            check_membership(&DistLostDataCheck, &single_owner, &addrs(&["A", "B", "C", "D"])),
            MembershipCheck::DataLost
        );
    }

    #[test]
    fn test_retain_members_keeps_order() {
        let kept = retain_members(&addrs(&["C", "A", "B"]), &addrs(&["A", "C"]));
        assert_eq!(kept, addrs(&["C", "A"]));
    }
}
