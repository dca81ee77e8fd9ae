//! Manager for caches that stay available through any split

use std::collections::HashMap;

use tracing::warn;

use super::manager::{FlagSet, PartitionHandlingManager, PendingCompletions};
use super::transaction::{EntryVersion, GlobalTransaction, Key, Modification};
use super::AvailabilityMode;
use crate::error::Result;
use crate::topology::{Address, CacheTopology};

/// Always-available manager: every check passes and nothing is tracked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvailablePartitionHandlingManager;

#[async_trait::async_trait]
impl PartitionHandlingManager for AvailablePartitionHandlingManager {
    fn availability_mode(&self) -> AvailabilityMode {
        AvailabilityMode::Available
    }

    async fn set_availability_mode(&self, mode: AvailabilityMode) {
        if mode != AvailabilityMode::Available {
            warn!(requested = %mode, "Cache is always available, ignoring availability mode change");
        }
    }

    fn check_write(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn check_read(&self, _key: &str, _flags: FlagSet) -> Result<()> {
        Ok(())
    }

    fn check_clear(&self) -> Result<()> {
        Ok(())
    }

    fn check_bulk_read(&self) -> Result<()> {
        Ok(())
    }

    fn add_partial_rollback_transaction(
        &self,
        _global_transaction: GlobalTransaction,
        _affected_nodes: Option<Vec<Address>>,
        _locked_keys: Vec<Key>,
    ) -> bool {
        false
    }

    fn add_partial_commit_2pc_transaction(
        &self,
        _global_transaction: GlobalTransaction,
        _affected_nodes: Option<Vec<Address>>,
        _locked_keys: Vec<Key>,
        _new_versions: HashMap<Key, EntryVersion>,
    ) -> bool {
        false
    }

    fn add_partial_commit_1pc_transaction(
        &self,
        _global_transaction: GlobalTransaction,
        _affected_nodes: Option<Vec<Address>>,
        _locked_keys: Vec<Key>,
        _modifications: Vec<Modification>,
    ) -> bool {
        false
    }

    fn is_transaction_partially_committed(&self, _global_transaction: &GlobalTransaction) -> bool {
        false
    }

    fn partial_transactions(&self) -> Vec<GlobalTransaction> {
        Vec::new()
    }

    fn can_rollback_transaction_after_originator_leave(&self, _global_transaction: &GlobalTransaction) -> bool {
        true
    }

    fn on_topology_update(&self, _topology: &CacheTopology) -> PendingCompletions {
        PendingCompletions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_available() {
        let manager = AvailablePartitionHandlingManager;
        manager.set_availability_mode(AvailabilityMode::DegradedMode).await;

        assert_eq!(manager.availability_mode(), AvailabilityMode::Available);
        assert!(manager.check_write("k").is_ok());
        assert!(manager.check_read("k", FlagSet::FORCE_WRITE_LOCK).is_ok());
        assert!(manager.check_clear().is_ok());
        assert!(manager.check_bulk_read().is_ok());
    }

    #[test]
    fn test_partial_transactions_are_not_tracked() {
        let manager = AvailablePartitionHandlingManager;
        let gtx = GlobalTransaction::new(Address::new("A"), 1, false);
        assert!(!manager.add_partial_commit_1pc_transaction(gtx.clone(), None, Vec::new(), Vec::new()));
        assert!(!manager.is_transaction_partially_committed(&gtx));
        assert!(manager.partial_transactions().is_empty());
        assert!(manager.can_rollback_transaction_after_originator_leave(&gtx));
        assert_eq!(std::mem::size_of::<AvailablePartitionHandlingManager>(), 0);
    }
}
