#![deny(clippy::shadow_unrelated)]

pub mod bootstrap_loop;
pub mod chain;
pub mod clock_log;
pub mod config_models;
pub mod content_store;
pub mod coordination;
pub mod database;
pub mod exporter;
pub mod job_queue;
pub mod main_loop;
pub mod models;
pub mod peer_client;
pub mod server;
pub mod skipped_cid_loop;
pub mod snapback_loop;
pub mod sync_executor;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;

use crate::chain::ChainClient;
use crate::clock_log::ClockLogStore;
use crate::config_models::cli_args;
use crate::config_models::data_directory::DataDirectory;
use crate::content_store::ContentStore;
use crate::coordination::CoordinationStore;
use crate::coordination::MemoryCoordinationStore;
use crate::database::ReplicaDatabases;
use crate::job_queue::JobQueue;
use crate::job_queue::TaskType;
use crate::main_loop::MainLoopHandler;
use crate::models::replica::NodeIdentity;
use crate::models::state::NodeState;
use crate::models::sync::SyncHistory;
use crate::peer_client::PeerClient;
use crate::server::AppState;
use crate::snapback_loop::SnapbackLoop;
use crate::sync_executor::SyncJobHandler;

pub const SUCCESS_EXIT_CODE: i32 = 0;
pub const BOOTSTRAP_FAILED_EXIT_CODE: i32 = 1;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Construct every subsystem in dependency order and spawn the long-running
/// tasks. The chain client is injected: the node itself never assumes which
/// contract backend it is talking to.
pub async fn initialize(
    cli_args: cli_args::Args,
    chain: Arc<dyn ChainClient>,
) -> Result<MainLoopHandler> {
    info!(
        "Starting creator-node {VERSION} advertised at {}",
        cli_args.creator_node_endpoint
    );

    let data_directory = DataDirectory::get(cli_args.data_dir.clone())?;
    DataDirectory::create_dir_if_not_exists(&data_directory.root_dir_path()).await?;
    DataDirectory::create_dir_if_not_exists(&data_directory.content_dir_path()).await?;
    info!("Data directory is {data_directory}");

    let databases = ReplicaDatabases::open(&data_directory)?;
    let clock_log = ClockLogStore::new(Arc::new(TokioMutex::new(databases)));
    let content = ContentStore::new(data_directory.content_dir_path());
    let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
    let (identity_tx, identity_rx) = watch::channel(NodeIdentity::Bootstrapping);

    let cli = Arc::new(cli_args);
    let state = NodeState {
        cli: cli.clone(),
        clock_log,
        content,
        coordination: coordination.clone(),
        chain: chain.clone(),
        peer_client: PeerClient::new(cli.creator_node_endpoint.clone()),
        history: Arc::new(SyncHistory::default()),
        identity_rx,
    };

    let sync_queue = Arc::new(JobQueue::start(
        TaskType::Sync,
        cli.max_concurrency,
        Arc::new(SyncJobHandler::new(state.clone())),
        coordination,
    ));

    // Bind before spawning anything so a taken port fails the boot, not a
    // background task.
    let listener = TcpListener::bind(cli.own_listen_address())
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}. Is another instance running?",
                cli.listen_addr, cli.port
            )
        })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let mut task_join_handles = vec![];

    task_join_handles.push(tokio::spawn(bootstrap_loop::run(
        chain,
        cli.clone(),
        identity_tx,
        shutdown_rx.clone(),
    )));
    task_join_handles.push(tokio::spawn(
        SnapbackLoop::new(state.clone()).run(shutdown_rx.clone()),
    ));
    task_join_handles.push(tokio::spawn(
        skipped_cid_loop::SkippedCidLoop::new(state.clone()).run(shutdown_rx.clone()),
    ));
    task_join_handles.push(tokio::spawn(server::serve(
        AppState {
            node: state,
            sync_queue: sync_queue.clone(),
        },
        listener,
        shutdown_rx,
    )));
    info!("spawned bootstrap, snapback, skipped-cid and http tasks");

    Ok(MainLoopHandler::new(
        shutdown_tx,
        task_join_handles,
        sync_queue,
    ))
}
