use std::sync::Arc;

use tokio::sync::watch;

use crate::chain::ChainClient;
use crate::clock_log::ClockLogStore;
use crate::config_models::cli_args::Args;
use crate::content_store::ContentStore;
use crate::coordination::CoordinationStore;
use crate::models::replica::NodeIdentity;
use crate::models::replica::SpId;
use crate::models::sync::SyncError;
use crate::models::sync::SyncHistory;
use crate::peer_client::PeerClient;

/// The concrete handles every subsystem works against, assembled once at
/// boot in dependency order. Cloning is cheap; all fields are shared.
#[derive(Clone, Debug)]
pub struct NodeState {
    pub cli: Arc<Args>,
    pub clock_log: ClockLogStore,
    pub content: ContentStore,
    pub coordination: Arc<dyn CoordinationStore>,
    pub chain: Arc<dyn ChainClient>,
    pub peer_client: PeerClient,
    pub history: Arc<SyncHistory>,
    pub identity_rx: watch::Receiver<NodeIdentity>,
}

impl NodeState {
    pub fn identity(&self) -> NodeIdentity {
        *self.identity_rx.borrow()
    }

    /// Our service-provider id, or `BootstrapPending` until the bootstrap
    /// loop has published it.
    pub fn sp_id(&self) -> Result<SpId, SyncError> {
        self.identity().sp_id()
    }
}
