//! Node-local view of a cache's topologies

use std::sync::{Arc, PoisonError, RwLock};

use super::CacheTopology;
use crate::partitionhandling::AvailabilityMode;

/// Source of the live and stable topologies of one cache
pub trait TopologyProvider: Send + Sync {
    /// Topology currently installed on this node
    fn cache_topology(&self) -> Option<Arc<CacheTopology>>;

    /// Last topology reached while fully available and fully replicated
    fn stable_topology(&self) -> Option<Arc<CacheTopology>>;
}

/// Topology holder updated by the local topology manager
pub struct LocalTopology {
    cache_name: String,
    num_owners: usize,
    current: RwLock<Option<Arc<CacheTopology>>>,
    stable: RwLock<Option<Arc<CacheTopology>>>,
}

impl LocalTopology {
    pub fn new(cache_name: impl Into<String>, num_owners: usize) -> Self {
        Self {
            cache_name: cache_name.into(),
            num_owners,
            current: RwLock::new(None),
            stable: RwLock::new(None),
        }
    }

    /// Install a topology received from the coordinator.
    ///
    /// Topologies older than the installed one are ignored. Returns `true` when
    /// the topology was also promoted to stable.
    pub fn update(&self, topology: CacheTopology, mode: AvailabilityMode) -> bool {
        let topology = Arc::new(topology);
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(installed) = current.as_ref() {
                if installed.topology_id > topology.topology_id {
                    tracing::debug!(
                        cache = %self.cache_name,
                        installed = installed.topology_id,
                        received = topology.topology_id,
                        "Ignoring older topology"
                    );
                    return false;
                }
            }
            *current = Some(Arc::clone(&topology));
        }

        if topology.qualifies_as_stable(self.num_owners, mode) {
            tracing::debug!(
                cache = %self.cache_name,
                topology_id = topology.topology_id,
                "Topology is the new stable topology"
            );
            *self.stable.write().unwrap_or_else(PoisonError::into_inner) = Some(topology);
            return true;
        }
        false
    }

    /// Overwrite the stable topology, e.g. with the one recovered after a merge
    pub fn set_stable(&self, topology: Option<CacheTopology>) {
        *self.stable.write().unwrap_or_else(PoisonError::into_inner) = topology.map(Arc::new);
    }
}

impl TopologyProvider for LocalTopology {
    fn cache_topology(&self) -> Option<Arc<CacheTopology>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn stable_topology(&self) -> Option<Arc<CacheTopology>> {
        self.stable.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
