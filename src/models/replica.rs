use serde::Deserialize;
use serde::Serialize;

use super::sync::SyncError;

/// On-chain service-provider id. Zero is never a valid id; the chain returns
/// it for unregistered endpoints.
pub type SpId = u64;

/// A user's replica set as recorded on chain: the primary accepts writes,
/// both secondaries converge towards it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaSetRecord {
    pub primary_sp_id: SpId,
    pub secondary1_sp_id: SpId,
    pub secondary2_sp_id: SpId,
}

impl ReplicaSetRecord {
    pub fn members(&self) -> [SpId; 3] {
        [
            self.primary_sp_id,
            self.secondary1_sp_id,
            self.secondary2_sp_id,
        ]
    }

    pub fn secondaries(&self) -> [SpId; 2] {
        [self.secondary1_sp_id, self.secondary2_sp_id]
    }

    pub fn contains(&self, sp_id: SpId) -> bool {
        self.members().contains(&sp_id)
    }

    /// The set with `unhealthy` swapped for `replacement`. Primary position
    /// is never touched by reconfiguration.
    pub fn with_secondary_replaced(&self, unhealthy: SpId, replacement: SpId) -> Self {
        let mut updated = *self;
        if updated.secondary1_sp_id == unhealthy {
            updated.secondary1_sp_id = replacement;
        } else if updated.secondary2_sp_id == unhealthy {
            updated.secondary2_sp_id = replacement;
        }
        updated
    }
}

/// The node's own identity. Starts out unknown; the bootstrap loop fills in
/// the service-provider id once the chain recognizes our endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NodeIdentity {
    #[default]
    Bootstrapping,
    Ready {
        sp_id: SpId,
    },
}

impl NodeIdentity {
    pub fn is_ready(&self) -> bool {
        matches!(self, NodeIdentity::Ready { .. })
    }

    /// The service-provider id, or `BootstrapPending` while the bootstrap
    /// loop is still negotiating with the chain.
    pub fn sp_id(&self) -> Result<SpId, SyncError> {
        match self {
            NodeIdentity::Ready { sp_id } => Ok(*sp_id),
            NodeIdentity::Bootstrapping => Err(SyncError::BootstrapPending),
        }
    }
}

#[cfg(test)]
mod replica_tests {
    use super::*;

    fn replica_set() -> ReplicaSetRecord {
        ReplicaSetRecord {
            primary_sp_id: 1,
            secondary1_sp_id: 2,
            secondary2_sp_id: 3,
        }
    }

    #[test]
    fn replacement_swaps_only_the_unhealthy_secondary() {
        let updated = replica_set().with_secondary_replaced(3, 7);
        assert_eq!(1, updated.primary_sp_id);
        assert_eq!(2, updated.secondary1_sp_id);
        assert_eq!(7, updated.secondary2_sp_id);

        // a primary is never replaced by this path
        let untouched = replica_set().with_secondary_replaced(1, 7);
        assert_eq!(replica_set(), untouched);
    }

    #[test]
    fn identity_gates_chain_dependent_work() {
        assert!(matches!(
            NodeIdentity::Bootstrapping.sp_id(),
            Err(SyncError::BootstrapPending)
        ));
        assert_eq!(Ok(4), NodeIdentity::Ready { sp_id: 4 }.sp_id());
    }
}
