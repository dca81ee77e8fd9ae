//! Segment ownership
//!
//! A `ConsistentHash` maps keys to segments and segments to an ordered list of
//! owners. Balancing new hashes is the job of the hash factory owned by the
//! topology coordinator; this module only provides the lookups the partition
//! handling layer needs, plus a simple round-robin layout.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::Address;

/// Segment to owners mapping
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsistentHash {
    members: Vec<Address>,
    segment_owners: Vec<Vec<Address>>,
}

impl ConsistentHash {
    /// Create a hash from an explicit owner list per segment
    pub fn new(members: Vec<Address>, segment_owners: Vec<Vec<Address>>) -> Self {
        Self {
            members,
            segment_owners,
        }
    }

    /// Spread `num_segments` segments over `members`, `num_owners` copies each.
    ///
    /// Segment `i` is owned by `members[i % n]`, `members[(i + 1) % n]`, and so on.
    pub fn round_robin(members: &[Address], num_segments: usize, num_owners: usize) -> Self {
        let copies = num_owners.min(members.len());
        let segment_owners = (0..num_segments)
            .map(|segment| {
                (0..copies)
                    .map(|k| members[(segment + k) % members.len()].clone())
                    .collect()
            })
            .collect();

        Self {
            members: members.to_vec(),
            segment_owners,
        }
    }

    /// Members of the hash, in join order
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// Number of segments
    pub fn num_segments(&self) -> usize {
        self.segment_owners.len()
    }

    /// Owners of a segment, primary first
    pub fn locate_owners_for_segment(&self, segment: usize) -> &[Address] {
        self.segment_owners
            .get(segment)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Segment a key belongs to
    pub fn segment_for_key(&self, key: &str) -> usize {
        if self.segment_owners.is_empty() {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.segment_owners.len() as u64) as usize
    }

    /// Owners of a key, primary first
    pub fn locate_owners(&self, key: &str) -> &[Address] {
        self.locate_owners_for_segment(self.segment_for_key(key))
    }

    /// Primary owner of a key
    pub fn primary_owner(&self, key: &str) -> Option<&Address> {
        self.locate_owners(key).first()
    }

    /// Segment-wise union of two hashes.
    ///
    /// Owners of `self` keep their position; owners only present in `other` are
    /// appended. Used as the read/write hash while a rebalance is in flight.
    pub fn union(&self, other: &ConsistentHash) -> ConsistentHash {
        let mut members = self.members.clone();
        for member in &other.members {
            if !members.contains(member) {
                members.push(member.clone());
            }
        }

        let num_segments = self.num_segments().max(other.num_segments());
        let segment_owners = (0..num_segments)
            .map(|segment| {
                let mut owners = self.locate_owners_for_segment(segment).to_vec();
                for owner in other.locate_owners_for_segment(segment) {
                    if !owners.contains(owner) {
                        owners.push(owner.clone());
                    }
                }
                owners
            })
            .collect();

        ConsistentHash {
            members,
            segment_owners,
        }
    }

    /// Copy of this hash restricted to `members`; segments may lose owners
    pub fn retain_members(&self, members: &[Address]) -> ConsistentHash {
        ConsistentHash {
            members: self
                .members
                .iter()
                .filter(|m| members.contains(m))
                .cloned()
                .collect(),
            segment_owners: self
                .segment_owners
                .iter()
                .map(|owners| {
                    owners
                        .iter()
                        .filter(|o| members.contains(o))
                        .cloned()
                        .collect()
                })
                .collect(),
        }
    }
}
