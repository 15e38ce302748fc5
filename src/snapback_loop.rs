use std::time::Duration;

use anyhow::Result;
use rand::seq::IndexedRandom;
use tokio::select;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::coordination::keys;
use crate::models::replica::ReplicaSetRecord;
use crate::models::replica::SpId;
use crate::models::state::NodeState;
use crate::models::sync::SyncError;
use crate::models::sync::SyncJobParams;

/// Consecutive failed probes of one (user, secondary) pair before we give up
/// on the secondary and propose replacing it.
const UNHEALTHY_PROBE_THRESHOLD: i64 = 5;

/// A pending reconfiguration parks probing of its pair. The TTL unwedges the
/// pair if the chain never confirms the proposal.
const RECONFIG_MARKER_TTL: Duration = Duration::from_secs(3600);

/// The periodic controller that re-converges secondaries towards this node:
/// probe, classify, schedule sync, and as a last resort swap an unreachable
/// secondary out of the replica set.
#[derive(Debug)]
pub struct SnapbackLoop {
    state: NodeState,
    cursor: usize,
}

impl SnapbackLoop {
    pub fn new(state: NodeState) -> Self {
        SnapbackLoop { state, cursor: 0 }
    }

    /// Run until shutdown. The first tick waits for identity bootstrap; all
    /// of snapback's decisions need to know which sp_id is "us".
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<()>) -> Result<()> {
        let mut identity_rx = self.state.identity_rx.clone();
        select! {
            _ = shutdown_rx.changed() => {
                debug!("snapback shutting down before bootstrap completed");
                return Ok(());
            }
            ready = identity_rx.wait_for(|identity| identity.is_ready()) => {
                ready?;
            }
        }
        info!(
            "snapback starting with interval {}ms",
            self.state.cli.snapback_interval_ms
        );

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.state.cli.snapback_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            select! {
                _ = shutdown_rx.changed() => {
                    debug!("snapback shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_tick().await {
                        warn!("snapback tick failed: {e}");
                    }
                }
            }
        }
        Ok(())
    }

    /// Inspect one bounded batch of users, round-robin across ticks so a
    /// large user count cannot turn a tick into a thundering herd.
    pub(crate) async fn run_tick(&mut self) -> Result<(), SyncError> {
        let own_sp_id = self.state.sp_id()?;
        let wallets = self.state.clock_log.wallets().await?;
        if wallets.is_empty() {
            return Ok(());
        }

        let batch_size = self.state.cli.snapback_batch_size.min(wallets.len());
        let batch: Vec<String> = (0..batch_size)
            .map(|offset| wallets[(self.cursor + offset) % wallets.len()].clone())
            .collect();
        self.cursor = (self.cursor + batch_size) % wallets.len();

        for wallet in batch {
            if let Err(e) = self.converge_user(&wallet, own_sp_id).await {
                warn!("snapback failed to converge {wallet}: {e}");
            }
        }
        Ok(())
    }

    /// Probe both secondaries of one user and act on what comes back.
    pub(crate) async fn converge_user(&self, wallet: &str, own_sp_id: SpId) -> Result<()> {
        let Some(replica_set) = self.state.chain.replica_set(wallet).await? else {
            return Ok(());
        };
        if replica_set.primary_sp_id != own_sp_id {
            return Ok(());
        }

        let primary_clock = self.state.clock_log.local_clock(wallet).await?;
        for sp_id in replica_set.secondaries() {
            if sp_id == own_sp_id {
                continue;
            }
            // a pair with a reconfiguration in flight is parked until the
            // chain confirms (the set changes) or the marker expires
            if self
                .state
                .coordination
                .get(&keys::reconfig(wallet, sp_id))
                .await
                .is_some()
            {
                continue;
            }
            let Some(endpoint) = self.state.chain.endpoint_for(sp_id).await? else {
                warn!("secondary sp {sp_id} of {wallet} has no registered endpoint");
                continue;
            };

            match self.state.peer_client.clock_status(&endpoint, wallet).await {
                Ok(clock) if clock == primary_clock => {
                    self.state
                        .coordination
                        .del(&keys::unhealthy(wallet, sp_id))
                        .await;
                }
                Ok(clock) if clock < primary_clock => {
                    self.state
                        .coordination
                        .del(&keys::unhealthy(wallet, sp_id))
                        .await;
                    info!(
                        "secondary {endpoint} is behind for {wallet} ({clock} < {primary_clock}), requesting sync"
                    );
                    let params = SyncJobParams {
                        wallet: vec![wallet.to_string()],
                        creator_node_endpoint: self.state.cli.creator_node_endpoint.clone(),
                        block_number: None,
                        force_resync: false,
                    };
                    if let Err(e) = self.state.peer_client.request_sync(&endpoint, &params).await
                    {
                        warn!("sync trigger to {endpoint} for {wallet} failed: {e}");
                    }
                }
                Ok(clock) => {
                    // a secondary ahead of its primary needs an operator
                    warn!(
                        "secondary {endpoint} is ahead of primary for {wallet} ({clock} > {primary_clock})"
                    );
                }
                Err(e) => {
                    let misses = self
                        .state
                        .coordination
                        .incr(&keys::unhealthy(wallet, sp_id))
                        .await;
                    warn!(
                        "probe of {endpoint} for {wallet} failed ({misses} consecutive): {e}"
                    );
                    if misses >= UNHEALTHY_PROBE_THRESHOLD {
                        self.propose_replacement(wallet, &replica_set, sp_id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Swap a durably unreachable secondary for a random healthy peer. The
    /// marker makes the proposal idempotent across ticks and restarts.
    async fn propose_replacement(
        &self,
        wallet: &str,
        replica_set: &ReplicaSetRecord,
        unhealthy_sp_id: SpId,
    ) -> Result<()> {
        let marker = keys::reconfig(wallet, unhealthy_sp_id);
        if !self
            .state
            .coordination
            .setnx(&marker, "proposed", Some(RECONFIG_MARKER_TTL))
            .await
        {
            return Ok(());
        }

        // re-read the set: another proposal may have landed since the probe
        let current = self
            .state
            .chain
            .replica_set(wallet)
            .await?
            .unwrap_or(*replica_set);
        if !current.contains(unhealthy_sp_id) {
            return Ok(());
        }

        let candidates: Vec<SpId> = self
            .state
            .chain
            .content_nodes()
            .await?
            .into_iter()
            .map(|(sp_id, _)| sp_id)
            .filter(|sp_id| !current.contains(*sp_id))
            .collect();
        let Some(replacement) = candidates.choose(&mut rand::rng()).copied() else {
            warn!("no healthy replacement candidates for {wallet}, dropping proposal");
            self.state.coordination.del(&marker).await;
            return Ok(());
        };

        let proposed = current.with_secondary_replaced(unhealthy_sp_id, replacement);
        info!(
            "proposing replica-set update for {wallet}: sp {unhealthy_sp_id} -> sp {replacement}"
        );
        if let Err(e) = self
            .state
            .chain
            .propose_replica_set_update(wallet, proposed)
            .await
        {
            // free the pair so a later tick can retry the proposal
            self.state.coordination.del(&marker).await;
            return Err(e);
        }
        self.state
            .coordination
            .del(&keys::unhealthy(wallet, unhealthy_sp_id))
            .await;
        Ok(())
    }
}
