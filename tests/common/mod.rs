//! Shared fixtures for the integration tests
//!
//! A recording coordinator context for the strategies, and mock transport,
//! lock and notification collaborators for the manager.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use kv_cache_partition::partitionhandling::transaction::Key;
use kv_cache_partition::partitionhandling::{
    AvailabilityMode, AvailabilityStrategyContext, GlobalTransaction, LockManager,
    PartitionStatusNotifier, RemoteCommand, Response, TransactionRpc,
};
use kv_cache_partition::topology::{
    Address, CacheJoinInfo, CacheStatusResponse, CacheTopology, ConsistentHash,
};
use kv_cache_partition::RpcError;

pub fn addrs(names: &[&str]) -> Vec<Address> {
    names.iter().map(|n| Address::new(*n)).collect()
}

/// Topology without rebalance, `num_owners` copies of each of `segments` segments
pub fn stable_topology(id: i32, names: &[&str], segments: usize, num_owners: usize) -> CacheTopology {
    CacheTopology::stable(id, id, ConsistentHash::round_robin(&addrs(names), segments, num_owners))
}

/// Copy of `topology` whose reachable members are `actual`
pub fn with_actual_members(topology: &CacheTopology, id: i32, actual: &[&str]) -> CacheTopology {
    let mut copy = topology.clone();
    copy.topology_id = id;
    copy.actual_members = addrs(actual);
    copy
}

pub fn status(
    topology: Option<CacheTopology>,
    stable: Option<CacheTopology>,
    mode: AvailabilityMode,
) -> CacheStatusResponse {
    CacheStatusResponse::new(Some(CacheJoinInfo::default()), topology, stable, mode)
}

/// Calls a strategy made on the context
#[derive(Debug, Clone, PartialEq)]
pub enum ContextCall {
    QueueRebalance(Vec<Address>),
    UpdateCurrentTopology(Vec<Address>),
    UpdateAvailabilityMode {
        members: Vec<Address>,
        mode: AvailabilityMode,
        cancel_rebalance: bool,
    },
    ManuallyUpdateAvailabilityMode {
        members: Vec<Address>,
        mode: AvailabilityMode,
        cancel_rebalance: bool,
    },
    UpdateTopologiesAfterMerge {
        current: Option<CacheTopology>,
        stable: Option<CacheTopology>,
        mode: Option<AvailabilityMode>,
        resolve_conflicts: bool,
    },
    QueueConflictResolution {
        topology: CacheTopology,
        preferred_nodes: Vec<Address>,
    },
}

/// Coordinator context that records every mutation and applies it to its state
pub struct RecordingContext {
    pub cache_name: String,
    pub current: Option<CacheTopology>,
    pub stable: Option<CacheTopology>,
    pub mode: AvailabilityMode,
    pub expected: Vec<Address>,
    pub resolve_conflicts: bool,
    pub manually_degraded: bool,
    pub restart_conflict_resolution: bool,
    pub calls: Vec<ContextCall>,
}

impl RecordingContext {
    pub fn new(expected: &[&str]) -> Self {
        Self {
            cache_name: "test-cache".to_string(),
            current: None,
            stable: None,
            mode: AvailabilityMode::Available,
            expected: addrs(expected),
            resolve_conflicts: false,
            manually_degraded: false,
            restart_conflict_resolution: false,
            calls: Vec::new(),
        }
    }

    /// Context whose current and stable topology are both `topology`
    pub fn with_stable(topology: CacheTopology, expected: &[&str]) -> Self {
        let mut context = Self::new(expected);
        context.current = Some(topology.clone());
        context.stable = Some(topology);
        context
    }

    pub fn rebalances(&self) -> Vec<Vec<Address>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ContextCall::QueueRebalance(members) => Some(members.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn mode_updates(&self) -> Vec<(AvailabilityMode, bool)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ContextCall::UpdateAvailabilityMode { mode, cancel_rebalance, .. } => Some((*mode, *cancel_rebalance)),
                _ => None,
            })
            .collect()
    }

    pub fn merges(&self) -> Vec<(Option<CacheTopology>, Option<AvailabilityMode>, bool)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ContextCall::UpdateTopologiesAfterMerge {
                    current,
                    mode,
                    resolve_conflicts,
                    ..
                } => Some((current.clone(), *mode, *resolve_conflicts)),
                _ => None,
            })
            .collect()
    }
}

impl AvailabilityStrategyContext for RecordingContext {
    fn cache_name(&self) -> &str {
        &self.cache_name
    }

    fn join_info(&self) -> CacheJoinInfo {
        CacheJoinInfo::default()
    }

    fn capacity_factors(&self) -> HashMap<Address, f32> {
        self.expected.iter().map(|member| (member.clone(), 1.0)).collect()
    }

    fn current_topology(&self) -> Option<CacheTopology> {
        self.current.clone()
    }

    fn stable_topology(&self) -> Option<CacheTopology> {
        self.stable.clone()
    }

    fn availability_mode(&self) -> AvailabilityMode {
        self.mode
    }

    fn expected_members(&self) -> Vec<Address> {
        self.expected.clone()
    }

    fn queue_rebalance(&mut self, new_members: &[Address]) {
        self.calls.push(ContextCall::QueueRebalance(new_members.to_vec()));
    }

    fn update_current_topology(&mut self, new_members: &[Address]) {
        if let Some(current) = &mut self.current {
            current.topology_id += 1;
            current.actual_members = new_members.to_vec();
        }
        self.calls.push(ContextCall::UpdateCurrentTopology(new_members.to_vec()));
    }

    fn update_availability_mode(
        &mut self,
        actual_members: &[Address],
        mode: AvailabilityMode,
        cancel_rebalance: bool,
    ) {
        self.mode = mode;
        if let Some(current) = &mut self.current {
            current.topology_id += 1;
            current.actual_members = actual_members.to_vec();
        }
        self.calls.push(ContextCall::UpdateAvailabilityMode {
            members: actual_members.to_vec(),
            mode,
            cancel_rebalance,
        });
    }

    fn manually_update_availability_mode(
        &mut self,
        actual_members: &[Address],
        mode: AvailabilityMode,
        cancel_rebalance: bool,
    ) {
        self.mode = mode;
        self.manually_degraded = mode != AvailabilityMode::Available;
        self.calls.push(ContextCall::ManuallyUpdateAvailabilityMode {
            members: actual_members.to_vec(),
            mode,
            cancel_rebalance,
        });
    }

    fn update_topologies_after_merge(
        &mut self,
        current: Option<CacheTopology>,
        stable: Option<CacheTopology>,
        mode: Option<AvailabilityMode>,
        resolve_conflicts: bool,
    ) {
        if current.is_some() {
            self.current = current.clone();
        }
        if stable.is_some() {
            self.stable = stable.clone();
        }
        if let Some(mode) = mode {
            self.mode = mode;
        }
        self.calls.push(ContextCall::UpdateTopologiesAfterMerge {
            current,
            stable,
            mode,
            resolve_conflicts,
        });
    }

    fn resolve_conflicts_on_merge(&self) -> bool {
        self.resolve_conflicts
    }

    fn calculate_conflict_hash(
        &self,
        preferred: &ConsistentHash,
        distinct: &[ConsistentHash],
        actual_members: &[Address],
    ) -> ConsistentHash {
        distinct
            .iter()
            .fold(preferred.clone(), |union, ch| union.union(ch))
            .retain_members(actual_members)
    }

    fn queue_conflict_resolution(&mut self, topology: &CacheTopology, preferred_nodes: &[Address]) {
        self.calls.push(ContextCall::QueueConflictResolution {
            topology: topology.clone(),
            preferred_nodes: preferred_nodes.to_vec(),
        });
    }

    fn restart_conflict_resolution(&mut self, _members: &[Address]) -> bool {
        self.restart_conflict_resolution
    }

    fn is_manually_degraded(&self) -> bool {
        self.manually_degraded
    }
}

/// How the mock transport answers completion commands
#[derive(Debug, Clone)]
pub enum Reply {
    /// Every target answers with this response
    All(Response),
    /// The named node answers with the response, the others succeed
    One(Address, Response),
    /// The invocation itself fails
    Fail(RpcError),
}

/// Transport that records commands and answers from a queue of replies
pub struct MockRpc {
    cluster: Vec<Address>,
    replies: Mutex<VecDeque<Reply>>,
    pub invocations: Mutex<Vec<(Option<Vec<Address>>, RemoteCommand)>>,
    pub broadcasts: Mutex<Vec<RemoteCommand>>,
}

impl MockRpc {
    /// Transport over `cluster` that succeeds unless replies are queued
    pub fn new(cluster: &[&str]) -> Self {
        Self {
            cluster: addrs(cluster),
            replies: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn invocations(&self) -> Vec<(Option<Vec<Address>>, RemoteCommand)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn broadcasts(&self) -> Vec<RemoteCommand> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TransactionRpc for MockRpc {
    async fn invoke(
        &self,
        targets: Option<Vec<Address>>,
        command: RemoteCommand,
    ) -> Result<HashMap<Address, Response>, RpcError> {
        self.invocations.lock().unwrap().push((targets.clone(), command));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::All(Response::Success));
        let targets = targets.unwrap_or_else(|| self.cluster.clone());

        match reply {
            Reply::Fail(error) => Err(error),
            Reply::All(response) => Ok(targets.into_iter().map(|t| (t, response.clone())).collect()),
            Reply::One(node, response) => Ok(targets
                .into_iter()
                .map(|t| {
                    let answer = if t == node { response.clone() } else { Response::Success };
                    (t, answer)
                })
                .collect()),
        }
    }

    async fn send_to_all(&self, command: RemoteCommand) -> Result<(), RpcError> {
        self.broadcasts.lock().unwrap().push(command);
        Ok(())
    }
}

/// Lock manager that records released keys
#[derive(Default)]
pub struct RecordingLocks {
    pub released: Mutex<Vec<(Vec<Key>, GlobalTransaction)>>,
}

impl RecordingLocks {
    pub fn released(&self) -> Vec<(Vec<Key>, GlobalTransaction)> {
        self.released.lock().unwrap().clone()
    }
}

impl LockManager for RecordingLocks {
    fn unlock_all(&self, keys: &[Key], owner: &GlobalTransaction) {
        self.released.lock().unwrap().push((keys.to_vec(), owner.clone()));
    }
}

/// Notifier that records the order of notifications
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PartitionStatusNotifier for RecordingNotifier {
    async fn pre_availability_change(&self, cache_name: &str, current: AvailabilityMode, new: AvailabilityMode) {
        self.events
            .lock()
            .unwrap()
            .push(format!("pre {} {} -> {}", cache_name, current, new));
    }

    async fn post_availability_change(&self, cache_name: &str, previous: AvailabilityMode, new: AvailabilityMode) {
        self.events
            .lock()
            .unwrap()
            .push(format!("post {} {} -> {}", cache_name, previous, new));
    }
}

/// Collaborators of a manager under test
pub struct ManagerFixture {
    pub topology: Arc<kv_cache_partition::topology::LocalTopology>,
    pub rpc: Arc<MockRpc>,
    pub locks: Arc<RecordingLocks>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: Arc<kv_cache_partition::InMemoryEventLog>,
    pub metrics: Arc<kv_cache_partition::PartitionMetrics>,
}

impl ManagerFixture {
    pub fn new(cluster: &[&str]) -> Self {
        Self {
            topology: Arc::new(kv_cache_partition::topology::LocalTopology::new("test-cache", 2)),
            rpc: Arc::new(MockRpc::new(cluster)),
            locks: Arc::new(RecordingLocks::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            events: Arc::new(kv_cache_partition::InMemoryEventLog::new(64)),
            metrics: Arc::new(kv_cache_partition::PartitionMetrics::default()),
        }
    }

    pub fn manager(
        &self,
        policy: kv_cache_partition::PartitionHandlingPolicy,
        versioned: bool,
    ) -> kv_cache_partition::partitionhandling::DefaultPartitionHandlingManager {
        kv_cache_partition::partitionhandling::DefaultPartitionHandlingManager::new(
            "test-cache".to_string(),
            policy,
            versioned,
            self.topology.clone(),
            self.rpc.clone(),
            self.locks.clone(),
            self.notifier.clone(),
            self.events.clone(),
            self.metrics.clone(),
        )
    }
}
