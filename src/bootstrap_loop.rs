use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::chain::ChainClient;
use crate::config_models::cli_args::Args;
use crate::models::replica::NodeIdentity;

const SP_ID_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const REGISTER_RETRY_INTERVAL: Duration = Duration::from_secs(10);
const REGISTRY_POLL_INTERVAL: Duration = Duration::from_secs(600);
const REGISTRY_POLL_INTERVAL_DEV: Duration = Duration::from_secs(10);

/// Bind this node instance to its on-chain identity: resolve our advertised
/// endpoint to a service-provider id, wait for the replica-set registry,
/// register on it, then publish `Ready` so the chain-gated subsystems start.
///
/// Every step retries forever; only a shutdown signal ends the loop early.
pub async fn run(
    chain: Arc<dyn ChainClient>,
    cli: Arc<Args>,
    identity_tx: watch::Sender<NodeIdentity>,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<()> {
    let endpoint = cli.creator_node_endpoint.clone();

    let sp_id = loop {
        match chain.service_provider_id(&endpoint).await {
            Ok(Some(sp_id)) if sp_id != 0 => break sp_id,
            Ok(_) => info!("{endpoint} is not registered on chain yet, retrying"),
            Err(e) => warn!("service-provider lookup for {endpoint} failed: {e}"),
        }
        if sleep_or_shutdown(SP_ID_RETRY_INTERVAL, &mut shutdown_rx).await {
            return Ok(());
        }
    };
    info!("resolved own service-provider id: {sp_id}");

    let registry_poll = if cli.dev_mode {
        REGISTRY_POLL_INTERVAL_DEV
    } else {
        REGISTRY_POLL_INTERVAL
    };
    loop {
        match chain.replica_set_registry_deployed().await {
            Ok(true) => break,
            Ok(false) => info!("replica-set registry not deployed yet, polling"),
            Err(e) => warn!("registry deployment check failed: {e}"),
        }
        if sleep_or_shutdown(registry_poll, &mut shutdown_rx).await {
            return Ok(());
        }
    }

    loop {
        match chain.register_service_provider(sp_id, &endpoint).await {
            Ok(()) => break,
            Err(e) => warn!("replica-set registry registration failed: {e}"),
        }
        if sleep_or_shutdown(REGISTER_RETRY_INTERVAL, &mut shutdown_rx).await {
            return Ok(());
        }
    }

    identity_tx.send(NodeIdentity::Ready { sp_id }).ok();
    info!("identity bootstrap complete, sp_id {sp_id} registered at {endpoint}");
    Ok(())
}

/// Sleep, unless shutdown arrives first. Returns whether to shut down.
async fn sleep_or_shutdown(duration: Duration, shutdown_rx: &mut watch::Receiver<()>) -> bool {
    select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown_rx.changed() => {
            debug!("bootstrap interrupted by shutdown");
            true
        }
    }
}
