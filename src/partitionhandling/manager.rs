//! Partition handling manager
//!
//! Per-cache gatekeeper consulted by every data operation, plus the registry of
//! transactions that only partially completed while the cluster was split.

use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::transaction::{
    EntryVersion, GlobalTransaction, Key, LockManager, Modification, RemoteCommand, Response,
    TransactionInfo, TransactionRpc,
};
use super::{AvailabilityMode, PartitionHandlingPolicy};
use crate::error::{PartitionError, Result};
use crate::events::{EventLogCategory, EventLogger};
use crate::log::log_partition_operation;
use crate::metrics::{AdmissionOperation, PartitionMetrics};
use crate::topology::{Address, CacheTopology, TopologyProvider};

/// Command flags relevant to admission checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlagSet(u32);

impl FlagSet {
    pub const NONE: FlagSet = FlagSet(0);
    /// The read acquires a write lock on the key
    pub const FORCE_WRITE_LOCK: FlagSet = FlagSet(1);

    pub fn contains(self, other: FlagSet) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FlagSet {
    type Output = FlagSet;

    fn bitor(self, rhs: FlagSet) -> FlagSet {
        FlagSet(self.0 | rhs.0)
    }
}

/// Receives availability mode transitions.
///
/// The manager awaits the pre-change notification before storing the new mode
/// and awaits the post-change notification before returning.
#[async_trait::async_trait]
pub trait PartitionStatusNotifier: Send + Sync {
    async fn pre_availability_change(&self, cache_name: &str, current: AvailabilityMode, new: AvailabilityMode);

    async fn post_availability_change(&self, cache_name: &str, previous: AvailabilityMode, new: AvailabilityMode);
}

/// Notifier for caches nobody listens to
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatusNotifier;

#[async_trait::async_trait]
impl PartitionStatusNotifier for NoopStatusNotifier {
    async fn pre_availability_change(&self, _: &str, _: AvailabilityMode, _: AvailabilityMode) {}

    async fn post_availability_change(&self, _: &str, _: AvailabilityMode, _: AvailabilityMode) {}
}

/// Completion tasks started by a topology update
#[derive(Debug, Default)]
pub struct PendingCompletions {
    handles: Vec<JoinHandle<()>>,
}

impl PendingCompletions {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until every completion attempt finished
    pub async fn wait(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!("Partial transaction completion task failed: {}", e);
            }
        }
    }
}

#[async_trait::async_trait]
pub trait PartitionHandlingManager: Send + Sync {
    fn availability_mode(&self) -> AvailabilityMode;

    /// Change the mode, notifying listeners before and after the change
    async fn set_availability_mode(&self, mode: AvailabilityMode);

    fn check_write(&self, key: &str) -> Result<()>;

    fn check_read(&self, key: &str, flags: FlagSet) -> Result<()>;

    fn check_clear(&self) -> Result<()>;

    fn check_bulk_read(&self) -> Result<()>;

    fn add_partial_rollback_transaction(
        &self,
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
    ) -> bool;

    fn add_partial_commit_2pc_transaction(
        &self,
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
        new_versions: HashMap<Key, EntryVersion>,
    ) -> bool;

    fn add_partial_commit_1pc_transaction(
        &self,
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
        modifications: Vec<Modification>,
    ) -> bool;

    /// `true` when a commit of the transaction is pending; pending rollbacks
    /// never hold locks back
    fn is_transaction_partially_committed(&self, global_transaction: &GlobalTransaction) -> bool;

    /// Transactions waiting for the stable topology
    fn partial_transactions(&self) -> Vec<GlobalTransaction>;

    fn can_rollback_transaction_after_originator_leave(&self, global_transaction: &GlobalTransaction) -> bool;

    /// Called for every installed topology; completes pending transactions
    /// once the stable topology is back
    fn on_topology_update(&self, topology: &CacheTopology) -> PendingCompletions;
}

/// Manager for caches that restrict service while degraded
pub struct DefaultPartitionHandlingManager {
    cache_name: String,
    policy: PartitionHandlingPolicy,
    versioned: bool,
    availability_mode: AtomicU8,
    partial_transactions: Arc<DashMap<GlobalTransaction, TransactionInfo>>,
    topology: Arc<dyn TopologyProvider>,
    rpc: Arc<dyn TransactionRpc>,
    locks: Arc<dyn LockManager>,
    notifier: Arc<dyn PartitionStatusNotifier>,
    events: Arc<dyn EventLogger>,
    metrics: Arc<PartitionMetrics>,
}

/// State moved into a completion task
#[derive(Clone)]
struct Completion {
    cache_name: String,
    partial_transactions: Arc<DashMap<GlobalTransaction, TransactionInfo>>,
    rpc: Arc<dyn TransactionRpc>,
    locks: Arc<dyn LockManager>,
    events: Arc<dyn EventLogger>,
    metrics: Arc<PartitionMetrics>,
}

impl Completion {
    async fn run(self, info: TransactionInfo, command: RemoteCommand, targets: Option<Vec<Address>>) {
        let start = Instant::now();
        let global_transaction = info.global_transaction().clone();
        let topology_id = command.topology_id();
        debug!(
            cache = %self.cache_name,
            transaction = %global_transaction,
            targets = ?targets,
            "Completing partial transaction"
        );

        let responses = match self.rpc.invoke(targets, command).await {
            Ok(responses) => responses,
            Err(e) => {
                error!(
                    cache = %self.cache_name,
                    transaction = %global_transaction,
                    error = %e,
                    "Failed to complete partial transaction, keeping it for the next stable topology"
                );
                self.metrics.record_completion_failure(&self.cache_name);
                return;
            }
        };

        for (node, response) in &responses {
            if response.requires_retry() {
                debug!(
                    cache = %self.cache_name,
                    transaction = %global_transaction,
                    node = %node,
                    response = ?response,
                    "Topology changed while completing transaction, keeping it pending"
                );
                self.metrics.record_completion(&self.cache_name, false);
                return;
            }
            if let Response::Exception(message) = response {
                error!(
                    cache = %self.cache_name,
                    transaction = %global_transaction,
                    node = %node,
                    "Partial transaction completion failed remotely: {}",
                    message
                );
                self.metrics.record_completion_failure(&self.cache_name);
                self.events.error(
                    EventLogCategory::Transaction,
                    &self.cache_name,
                    format!("Failed to complete transaction {} on {}: {}", global_transaction, node, message),
                );
                return;
            }
        }

        self.locks.unlock_all(info.locked_keys(), &global_transaction);
        self.partial_transactions.remove(&global_transaction);
        self.metrics.record_completion(&self.cache_name, true);
        log_partition_operation(
            "complete_partial_transaction",
            &self.cache_name,
            true,
            start.elapsed(),
            Some(vec![("transaction", global_transaction.to_string())]),
        );

        let notification = RemoteCommand::TxCompletionNotification {
            global_transaction: global_transaction.clone(),
            topology_id,
        };
        if let Err(e) = self.rpc.send_to_all(notification).await {
            warn!(
                cache = %self.cache_name,
                transaction = %global_transaction,
                error = %e,
                "Failed to send transaction completion notification"
            );
        }
    }
}

impl DefaultPartitionHandlingManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache_name: String,
        policy: PartitionHandlingPolicy,
        versioned: bool,
        topology: Arc<dyn TopologyProvider>,
        rpc: Arc<dyn TransactionRpc>,
        locks: Arc<dyn LockManager>,
        notifier: Arc<dyn PartitionStatusNotifier>,
        events: Arc<dyn EventLogger>,
        metrics: Arc<PartitionMetrics>,
    ) -> Self {
        Self {
            cache_name,
            policy,
            versioned,
            availability_mode: AtomicU8::new(AvailabilityMode::Available as u8),
            partial_transactions: Arc::new(DashMap::new()),
            topology,
            rpc,
            locks,
            notifier,
            events,
            metrics,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn policy(&self) -> PartitionHandlingPolicy {
        self.policy
    }

    fn completion(&self) -> Completion {
        Completion {
            cache_name: self.cache_name.clone(),
            partial_transactions: Arc::clone(&self.partial_transactions),
            rpc: Arc::clone(&self.rpc),
            locks: Arc::clone(&self.locks),
            events: Arc::clone(&self.events),
            metrics: Arc::clone(&self.metrics),
        }
    }

    fn check_key(&self, key: &str, write: bool, force_write_lock: bool) -> Result<()> {
        if self.availability_mode() == AvailabilityMode::Available {
            return Ok(());
        }

        let topology = self.topology.cache_topology();
        let allowed = match self.policy {
            PartitionHandlingPolicy::AllowReadWrites => {
                debug_assert!(false, "always-available cache {} reached an admission check", self.cache_name);
                true
            }
            PartitionHandlingPolicy::AllowReads => topology.as_deref().map_or(false, |topology| {
                if write || force_write_lock {
                    all_owners_reachable(&topology.write_owners(key), topology)
                } else {
                    topology
                        .read_owners(key)
                        .iter()
                        .any(|owner| topology.actual_members.contains(owner))
                }
            }),
            PartitionHandlingPolicy::DenyReadWrites => topology
                .as_deref()
                .filter(|topology| topology.is_well_formed())
                .map_or(false, |topology| {
                    let owners = if write || force_write_lock {
                        topology.write_owners(key)
                    } else {
                        topology.read_owners(key)
                    };
                    all_owners_reachable(&owners, topology)
                }),
        };

        if allowed {
            return Ok(());
        }

        let operation = if write { AdmissionOperation::Write } else { AdmissionOperation::Read };
        self.metrics.record_rejection(&self.cache_name, operation);
        debug!(
            cache = %self.cache_name,
            key = key,
            write = write,
            policy = %self.policy,
            "Key is not available in this partition"
        );
        if force_write_lock {
            Err(PartitionError::LockUnavailable { key: key.to_string() })
        } else {
            Err(PartitionError::KeyUnavailable { key: key.to_string() })
        }
    }

    fn add_partial_transaction(&self, info: TransactionInfo, kind: &'static str) -> bool {
        let global_transaction = info.global_transaction().clone();
        debug!(
            cache = %self.cache_name,
            transaction = %global_transaction,
            kind = kind,
            "Registering partially completed transaction"
        );
        self.partial_transactions.insert(global_transaction, info);
        self.metrics.record_partial_transaction(&self.cache_name, kind);
        true
    }
}

fn all_owners_reachable(owners: &[Address], topology: &CacheTopology) -> bool {
    owners.iter().all(|owner| topology.actual_members.contains(owner))
}

#[async_trait::async_trait]
impl PartitionHandlingManager for DefaultPartitionHandlingManager {
    fn availability_mode(&self) -> AvailabilityMode {
        AvailabilityMode::from_u8(self.availability_mode.load(Ordering::Acquire))
    }

    async fn set_availability_mode(&self, mode: AvailabilityMode) {
        let current = self.availability_mode();
        if current == mode {
            return;
        }

        self.notifier.pre_availability_change(&self.cache_name, current, mode).await;
        self.availability_mode.store(mode as u8, Ordering::Release);
        self.notifier.post_availability_change(&self.cache_name, current, mode).await;

        self.metrics.record_availability_change(&self.cache_name, mode);
        self.events.info(
            EventLogCategory::Cluster,
            &self.cache_name,
            format!("Cache availability changed from {} to {}", current, mode),
        );
    }

    fn check_write(&self, key: &str) -> Result<()> {
        self.check_key(key, true, false)
    }

    fn check_read(&self, key: &str, flags: FlagSet) -> Result<()> {
        self.check_key(key, false, flags.contains(FlagSet::FORCE_WRITE_LOCK))
    }

    fn check_clear(&self) -> Result<()> {
        if self.availability_mode() != AvailabilityMode::Available {
            self.metrics.record_rejection(&self.cache_name, AdmissionOperation::Clear);
            return Err(PartitionError::ClearDisallowed);
        }
        Ok(())
    }

    fn check_bulk_read(&self) -> Result<()> {
        if self.availability_mode() == AvailabilityMode::Available {
            return Ok(());
        }

        let allowed = match self.policy {
            PartitionHandlingPolicy::AllowReadWrites => {
                debug_assert!(false, "always-available cache {} reached a bulk read check", self.cache_name);
                true
            }
            PartitionHandlingPolicy::DenyReadWrites => false,
            PartitionHandlingPolicy::AllowReads => {
                self.topology.cache_topology().map_or(false, |topology| {
                    let read_hash = topology.read_consistent_hash();
                    (0..read_hash.num_segments()).all(|segment| {
                        read_hash
                            .locate_owners_for_segment(segment)
                            .iter()
                            .any(|owner| topology.actual_members.contains(owner))
                    })
                })
            }
        };

        if allowed {
            Ok(())
        } else {
            self.metrics.record_rejection(&self.cache_name, AdmissionOperation::BulkRead);
            Err(PartitionError::PartitionDegraded)
        }
    }

    fn add_partial_rollback_transaction(
        &self,
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
    ) -> bool {
        self.add_partial_transaction(
            TransactionInfo::Rollback {
                global_transaction,
                affected_nodes,
                locked_keys,
            },
            "rollback",
        )
    }

    fn add_partial_commit_2pc_transaction(
        &self,
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
        new_versions: HashMap<Key, EntryVersion>,
    ) -> bool {
        self.add_partial_transaction(
            TransactionInfo::Commit2Pc {
                global_transaction,
                affected_nodes,
                locked_keys,
                new_versions,
            },
            "commit_2pc",
        )
    }

    fn add_partial_commit_1pc_transaction(
        &self,
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
        modifications: Vec<Modification>,
    ) -> bool {
        self.add_partial_transaction(
            TransactionInfo::Commit1Pc {
                global_transaction,
                affected_nodes,
                locked_keys,
                modifications,
            },
            "commit_1pc",
        )
    }

    fn is_transaction_partially_committed(&self, global_transaction: &GlobalTransaction) -> bool {
        self.partial_transactions
            .get(global_transaction)
            .map_or(false, |info| !info.is_rolled_back())
    }

    fn partial_transactions(&self) -> Vec<GlobalTransaction> {
        self.partial_transactions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn can_rollback_transaction_after_originator_leave(&self, global_transaction: &GlobalTransaction) -> bool {
        self.availability_mode() == AvailabilityMode::Available
            && !self.partial_transactions.contains_key(global_transaction)
    }

    fn on_topology_update(&self, topology: &CacheTopology) -> PendingCompletions {
        if self.partial_transactions.is_empty() {
            return PendingCompletions::default();
        }
        let Some(stable) = self.topology.stable_topology() else {
            debug!(cache = %self.cache_name, "No stable topology yet, partial transactions stay pending");
            return PendingCompletions::default();
        };
        let back_to_stable = stable
            .actual_members
            .iter()
            .all(|member| topology.actual_members.contains(member));
        if !back_to_stable {
            debug!(
                cache = %self.cache_name,
                topology = %topology,
                stable = %stable,
                "Stable members not yet reachable, partial transactions stay pending"
            );
            return PendingCompletions::default();
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(
                    cache = %self.cache_name,
                    error = %e,
                    "No async runtime to complete partial transactions on, keeping them pending"
                );
                return PendingCompletions::default();
            }
        };

        // snapshot first: completion tasks remove entries concurrently
        let pending: Vec<TransactionInfo> = self
            .partial_transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        debug!(
            cache = %self.cache_name,
            count = pending.len(),
            topology_id = topology.topology_id,
            "Stable topology restored, completing partial transactions"
        );

        let handles = pending
            .into_iter()
            .map(|info| {
                let targets = info.commit_nodes(&stable);
                let command = info.build_command(self.versioned, topology.topology_id);
                runtime.spawn(self.completion().run(info, command, targets))
            })
            .collect();
        PendingCompletions { handles }
    }
}
