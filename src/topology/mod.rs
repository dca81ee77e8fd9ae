//! Cache topology model
//!
//! Versioned snapshots of segment ownership exchanged between the topology
//! coordinator and the members of a cache.

pub mod hash;
pub mod local;

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::partitionhandling::AvailabilityMode;

pub use hash::ConsistentHash;
pub use local::{LocalTopology, TopologyProvider};

/// Cluster node identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Rebalance phase of a topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// No rebalance in progress
    NoRebalance,
    /// Reads go to the old owners, writes to old and new owners
    ReadOldWriteAll,
    /// Reads and writes go to old and new owners
    ReadAllWriteAll,
    /// Reads go to the new owners, writes to old and new owners
    ReadNewWriteAll,
    /// Writes go to every plausible owner while merge conflicts are resolved
    ConflictResolution,
}

/// A versioned snapshot of who owns which segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheTopology {
    pub topology_id: i32,
    pub rebalance_id: i32,
    pub current_ch: ConsistentHash,
    /// Target hash of an in-flight rebalance
    pub pending_ch: Option<ConsistentHash>,
    pub phase: Phase,
    /// Members currently reachable
    pub actual_members: Vec<Address>,
}

impl CacheTopology {
    pub fn new(
        topology_id: i32,
        rebalance_id: i32,
        current_ch: ConsistentHash,
        pending_ch: Option<ConsistentHash>,
        phase: Phase,
        actual_members: Vec<Address>,
    ) -> Self {
        Self {
            topology_id,
            rebalance_id,
            current_ch,
            pending_ch,
            phase,
            actual_members,
        }
    }

    /// Topology with no rebalance whose actual members are the hash members
    pub fn stable(topology_id: i32, rebalance_id: i32, current_ch: ConsistentHash) -> Self {
        let actual_members = current_ch.members().to_vec();
        Self::new(topology_id, rebalance_id, current_ch, None, Phase::NoRebalance, actual_members)
    }

    /// Logically expected members: current hash members, then pending-only members
    pub fn members(&self) -> Vec<Address> {
        let mut members = self.current_ch.members().to_vec();
        if let Some(pending) = &self.pending_ch {
            for member in pending.members() {
                if !members.contains(member) {
                    members.push(member.clone());
                }
            }
        }
        members
    }

    pub fn is_rebalance_in_progress(&self) -> bool {
        self.pending_ch.is_some()
    }

    /// Topologies with negative ids were never properly installed
    pub fn is_well_formed(&self) -> bool {
        self.topology_id >= 0 && self.rebalance_id >= 0
    }

    /// Hash used to locate read owners in the current phase
    pub fn read_consistent_hash(&self) -> Cow<'_, ConsistentHash> {
        match (&self.pending_ch, self.phase) {
            (Some(pending), Phase::ReadAllWriteAll) => Cow::Owned(self.current_ch.union(pending)),
            (Some(pending), Phase::ReadNewWriteAll) => Cow::Borrowed(pending),
            _ => Cow::Borrowed(&self.current_ch),
        }
    }

    /// Hash used to locate write owners: old and new owners while rebalancing
    pub fn write_consistent_hash(&self) -> Cow<'_, ConsistentHash> {
        match &self.pending_ch {
            Some(pending) => Cow::Owned(self.current_ch.union(pending)),
            None => Cow::Borrowed(&self.current_ch),
        }
    }

    pub fn read_owners(&self, key: &str) -> Vec<Address> {
        self.read_consistent_hash().locate_owners(key).to_vec()
    }

    pub fn write_owners(&self, key: &str) -> Vec<Address> {
        self.write_consistent_hash().locate_owners(key).to_vec()
    }

    /// Whether this topology may become the stable topology.
    ///
    /// Requires no pending hash, an available cache, and every segment owned by
    /// at least `min(num_owners, members)` nodes.
    pub fn qualifies_as_stable(&self, num_owners: usize, mode: AvailabilityMode) -> bool {
        if mode != AvailabilityMode::Available || self.pending_ch.is_some() {
            return false;
        }
        let required = num_owners.min(self.current_ch.members().len());
        (0..self.current_ch.num_segments())
            .all(|segment| self.current_ch.locate_owners_for_segment(segment).len() >= required)
    }
}

impl fmt::Display for CacheTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheTopology(id={}, rebalance_id={}, phase={:?}, members={:?}, actual_members={:?})",
            self.topology_id,
            self.rebalance_id,
            self.phase,
            self.members(),
            self.actual_members
        )
    }
}

/// Cache settings sent by a node when it joins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheJoinInfo {
    pub num_segments: usize,
    pub num_owners: usize,
    pub capacity_factor: f32,
}

impl Default for CacheJoinInfo {
    fn default() -> Self {
        Self {
            num_segments: 256,
            num_owners: 2,
            capacity_factor: 1.0,
        }
    }
}

/// Per-node cache state reported to a new coordinator during a merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatusResponse {
    pub join_info: Option<CacheJoinInfo>,
    /// `None` when the node never finished joining
    pub cache_topology: Option<CacheTopology>,
    pub stable_topology: Option<CacheTopology>,
    pub availability_mode: AvailabilityMode,
}

impl CacheStatusResponse {
    pub fn new(
        join_info: Option<CacheJoinInfo>,
        cache_topology: Option<CacheTopology>,
        stable_topology: Option<CacheTopology>,
        availability_mode: AvailabilityMode,
    ) -> Self {
        Self {
            join_info,
            cache_topology,
            stable_topology,
            availability_mode,
        }
    }
}
