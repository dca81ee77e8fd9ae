//! Partially completed transactions
//!
//! A transaction whose commit or rollback could not reach every affected node
//! while the cluster was split is recorded as a [`TransactionInfo`] and completed
//! once the stable topology is back.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::topology::{Address, CacheTopology};

pub type Key = String;

/// Cluster-wide transaction identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalTransaction {
    /// Node that started the transaction
    pub originator: Address,
    pub id: u64,
    /// Whether this node is not the originator
    pub remote: bool,
}

impl GlobalTransaction {
    pub fn new(originator: Address, id: u64, remote: bool) -> Self {
        Self { originator, id, remote }
    }
}

impl PartialEq for GlobalTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.originator == other.originator
    }
}

impl Eq for GlobalTransaction {}

impl Hash for GlobalTransaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.originator.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for GlobalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GlobalTx:{}:{}{}",
            self.originator,
            self.id,
            if self.remote { ":remote" } else { "" }
        )
    }
}

/// Version assigned to an entry by a versioned commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryVersion(pub u64);

/// A single write of a one-phase transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modification {
    Put { key: Key, value: Vec<u8> },
    Remove { key: Key },
}

impl Modification {
    pub fn key(&self) -> &str {
        match self {
            Modification::Put { key, .. } | Modification::Remove { key } => key,
        }
    }
}

/// Command sent to complete a partial transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteCommand {
    Rollback {
        global_transaction: GlobalTransaction,
        topology_id: i32,
    },
    Commit {
        global_transaction: GlobalTransaction,
        /// Present for versioned caches
        new_versions: Option<HashMap<Key, EntryVersion>>,
        topology_id: i32,
    },
    /// Prepare with commit in a single phase, replaying the write set
    OnePhasePrepare {
        global_transaction: GlobalTransaction,
        modifications: Vec<Modification>,
        versioned: bool,
        topology_id: i32,
    },
    /// Lets the other nodes release the transaction's resources
    TxCompletionNotification {
        global_transaction: GlobalTransaction,
        topology_id: i32,
    },
}

impl RemoteCommand {
    pub fn global_transaction(&self) -> &GlobalTransaction {
        match self {
            RemoteCommand::Rollback { global_transaction, .. }
            | RemoteCommand::Commit { global_transaction, .. }
            | RemoteCommand::OnePhasePrepare { global_transaction, .. }
            | RemoteCommand::TxCompletionNotification { global_transaction, .. } => global_transaction,
        }
    }

    pub fn topology_id(&self) -> i32 {
        match self {
            RemoteCommand::Rollback { topology_id, .. }
            | RemoteCommand::Commit { topology_id, .. }
            | RemoteCommand::OnePhasePrepare { topology_id, .. }
            | RemoteCommand::TxCompletionNotification { topology_id, .. } => *topology_id,
        }
    }
}

/// Per-node answer to a completion command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Success,
    /// The node saw a newer topology while handling the command
    Unsure,
    /// The cache is not running on the node
    CacheNotFound,
    Exception(String),
}

impl Response {
    /// Whether the response means the topology changed while the command was in flight
    pub fn requires_retry(&self) -> bool {
        matches!(self, Response::Unsure | Response::CacheNotFound)
    }
}

/// Transport used to complete partial transactions
#[async_trait::async_trait]
pub trait TransactionRpc: Send + Sync {
    /// Invoke `command` on `targets`, or on every node when `targets` is `None`
    async fn invoke(
        &self,
        targets: Option<Vec<Address>>,
        command: RemoteCommand,
    ) -> Result<HashMap<Address, Response>, RpcError>;

    /// Fire-and-forget broadcast
    async fn send_to_all(&self, command: RemoteCommand) -> Result<(), RpcError>;
}

/// Releases locks held on behalf of a transaction
pub trait LockManager: Send + Sync {
    fn unlock_all(&self, keys: &[Key], owner: &GlobalTransaction);
}

/// A transaction waiting for the stable topology to come back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionInfo {
    Rollback {
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
    },
    Commit2Pc {
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
        new_versions: HashMap<Key, EntryVersion>,
    },
    Commit1Pc {
        global_transaction: GlobalTransaction,
        affected_nodes: Option<Vec<Address>>,
        locked_keys: Vec<Key>,
        modifications: Vec<Modification>,
    },
}

impl TransactionInfo {
    pub fn global_transaction(&self) -> &GlobalTransaction {
        match self {
            TransactionInfo::Rollback { global_transaction, .. }
            | TransactionInfo::Commit2Pc { global_transaction, .. }
            | TransactionInfo::Commit1Pc { global_transaction, .. } => global_transaction,
        }
    }

    /// Nodes touched by the transaction; `None` when unknown
    pub fn affected_nodes(&self) -> Option<&[Address]> {
        match self {
            TransactionInfo::Rollback { affected_nodes, .. }
            | TransactionInfo::Commit2Pc { affected_nodes, .. }
            | TransactionInfo::Commit1Pc { affected_nodes, .. } => affected_nodes.as_deref(),
        }
    }

    pub fn locked_keys(&self) -> &[Key] {
        match self {
            TransactionInfo::Rollback { locked_keys, .. }
            | TransactionInfo::Commit2Pc { locked_keys, .. }
            | TransactionInfo::Commit1Pc { locked_keys, .. } => locked_keys,
        }
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, TransactionInfo::Rollback { .. })
    }

    /// Completion command for this transaction, stamped with `topology_id`
    pub fn build_command(&self, versioned: bool, topology_id: i32) -> RemoteCommand {
        let global_transaction = self.global_transaction().clone();
        match self {
            TransactionInfo::Rollback { .. } => RemoteCommand::Rollback {
                global_transaction,
                topology_id,
            },
            TransactionInfo::Commit2Pc { new_versions, .. } => RemoteCommand::Commit {
                global_transaction,
                new_versions: versioned.then(|| new_versions.clone()),
                topology_id,
            },
            TransactionInfo::Commit1Pc { modifications, .. } => RemoteCommand::OnePhasePrepare {
                global_transaction,
                modifications: modifications.clone(),
                versioned,
                topology_id,
            },
        }
    }

    /// Affected nodes that are still members of the `stable` topology;
    /// `None` means broadcast
    pub fn commit_nodes(&self, stable: &CacheTopology) -> Option<Vec<Address>> {
        self.affected_nodes().map(|nodes| {
            let members = stable.members();
            nodes
                .iter()
                .filter(|node| members.contains(node))
                .cloned()
                .collect()
        })
    }
}
