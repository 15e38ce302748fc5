use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::job_queue::JobQueue;
use crate::SUCCESS_EXIT_CODE;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Owns the spawned subsystem tasks and drives the node until shutdown:
/// a termination signal, or any subsystem task ending on its own.
pub struct MainLoopHandler {
    shutdown_tx: watch::Sender<()>,
    task_join_handles: Vec<JoinHandle<Result<()>>>,
    // keeps the queue dispatcher alive for the node's lifetime
    _sync_queue: Arc<JobQueue>,
}

impl std::fmt::Debug for MainLoopHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoopHandler")
            .field("tasks", &self.task_join_handles.len())
            .finish()
    }
}

impl MainLoopHandler {
    pub fn new(
        shutdown_tx: watch::Sender<()>,
        task_join_handles: Vec<JoinHandle<Result<()>>>,
        sync_queue: Arc<JobQueue>,
    ) -> Self {
        MainLoopHandler {
            shutdown_tx,
            task_join_handles,
            _sync_queue: sync_queue,
        }
    }

    /// Block until shutdown, then wind the subsystems down and return the
    /// process exit code.
    pub async fn run(self) -> Result<i32> {
        let MainLoopHandler {
            shutdown_tx,
            mut task_join_handles,
            _sync_queue,
        } = self;

        let mut finished_index = None;
        {
            let pending: Vec<&mut JoinHandle<Result<()>>> = task_join_handles.iter_mut().collect();
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received termination signal, shutting down");
                }
                (result, index, _) = futures::future::select_all(pending) => {
                    match result {
                        Ok(Ok(())) => warn!("a node task exited early, shutting down"),
                        Ok(Err(e)) => error!("a node task failed: {e:#}"),
                        Err(join_error) => error!("a node task panicked: {join_error}"),
                    }
                    finished_index = Some(index);
                }
            }
        }

        shutdown_tx.send(()).ok();
        for (index, mut handle) in task_join_handles.into_iter().enumerate() {
            if Some(index) == finished_index {
                continue;
            }
            match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("task ended with error during shutdown: {e:#}"),
                Ok(Err(join_error)) => warn!("task panicked during shutdown: {join_error}"),
                Err(_elapsed) => {
                    warn!("task did not stop within the grace period, aborting it");
                    handle.abort();
                }
            }
        }

        info!("creator node shut down");
        Ok(SUCCESS_EXIT_CODE)
    }
}
