use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::models::state::NodeState;
use crate::models::sync::SyncError;
use crate::sync_executor::SyncExecutor;

const RETRY_INTERVAL: Duration = Duration::from_secs(600);
const RETRY_INTERVAL_DEV: Duration = Duration::from_secs(30);
/// Upper bound on files re-attempted per pass.
const RETRY_BATCH_SIZE: usize = 100;

/// Background scanner over files committed with `skipped = true`: each pass
/// re-resolves the owner's replica set and re-attempts the fetch. A file's
/// flag clears only after verified bytes hit the disk.
#[derive(Debug)]
pub struct SkippedCidLoop {
    state: NodeState,
    executor: SyncExecutor,
}

impl SkippedCidLoop {
    pub fn new(state: NodeState) -> Self {
        let executor = SyncExecutor::new(state.clone());
        SkippedCidLoop { state, executor }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) -> Result<()> {
        let interval = if self.state.cli.dev_mode {
            RETRY_INTERVAL_DEV
        } else {
            RETRY_INTERVAL
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown_rx.changed() => {
                    debug!("skipped-cid retry loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.retry_batch().await {
                        Ok(0) => {}
                        Ok(recovered) => info!("recovered {recovered} previously skipped files"),
                        Err(e) => warn!("skipped-cid retry pass failed: {e}"),
                    }
                }
            }
        }
        Ok(())
    }

    /// One pass: re-attempt a bounded batch of skipped files. Returns how
    /// many files were recovered.
    pub(crate) async fn retry_batch(&self) -> Result<usize, SyncError> {
        let batch = self.state.clock_log.skipped_files(RETRY_BATCH_SIZE).await?;
        if batch.is_empty() {
            return Ok(0);
        }
        debug!("retrying {} skipped files", batch.len());

        let mut recovered = 0;
        for (wallet, file) in batch {
            let sources = self.executor.content_sources(&wallet, None).await;
            if sources.is_empty() {
                continue;
            }
            match self.executor.fetch_one_file(&file, &sources).await {
                Ok(path) => {
                    self.state
                        .clock_log
                        .clear_skipped(file.user_uuid, file.file_uuid, path)
                        .await?;
                    recovered += 1;
                }
                Err(reason) => {
                    debug!("skipped file {} still unavailable: {reason}", file.multihash);
                }
            }
        }
        Ok(recovered)
    }
}
