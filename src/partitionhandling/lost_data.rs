//! Data loss detection

use crate::topology::{Address, ConsistentHash};

/// Decides whether a set of surviving members lost data of a hash
pub trait LostDataCheck: Send + Sync {
    /// `true` when at least one segment has no owner in `members`
    fn test(&self, ch: &ConsistentHash, members: &[Address]) -> bool;
}

/// Lost-data check for distributed caches
#[derive(Debug, Clone, Copy, Default)]
pub struct DistLostDataCheck;

impl LostDataCheck for DistLostDataCheck {
    fn test(&self, ch: &ConsistentHash, members: &[Address]) -> bool {
        (0..ch.num_segments()).any(|segment| {
            !ch.locate_owners_for_segment(segment)
                .iter()
                .any(|owner| members.contains(owner))
        })
    }
}

impl<F> LostDataCheck for F
where
    F: Fn(&ConsistentHash, &[Address]) -> bool + Send + Sync,
{
    fn test(&self, ch: &ConsistentHash, members: &[Address]) -> bool {
        self(ch, members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(names: &[&str]) -> Vec<Address> {
        names.iter().map(|n| Address::new(*n)).collect()
    }

    #[test]
    fn test_no_loss_while_one_owner_survives() {
        let ch = ConsistentHash::round_robin(&addrs(&["A", "B", "C", "D"]), 8, 2);
        assert!(!DistLostDataCheck.test(&ch, &addrs(&["A", "C"])));
    }

    #[test]
    fn test_loss_when_all_owners_gone() {
        let ch = ConsistentHash::round_robin(&addrs(&["A", "B", "C", "D"]), 8, 2);
        // segment 0 is owned by A and B
        assert!(DistLostDataCheck.test(&ch, &addrs(&["C", "D"])));
        assert!(DistLostDataCheck.test(&ch, &[]));
    }

    #[test]
    fn test_empty_hash_loses_nothing() {
        let ch = ConsistentHash::new(Vec::new(), Vec::new());
        assert!(!DistLostDataCheck.test(&ch, &[]));
    }

    #[test]
    fn test_closure_check() {
        let never = |_: &ConsistentHash, _: &[Address]| false;
        let ch = ConsistentHash::round_robin(&addrs(&["A"]), 1, 1);
        assert!(!never.test(&ch, &[]));
    }
}
