use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use creator_node::chain::ChainClient;
use creator_node::chain::DevChainClient;
use creator_node::chain::HttpChainClient;
use creator_node::config_models::cli_args;
use creator_node::BOOTSTRAP_FAILED_EXIT_CODE;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli_args::Args::parse();

    // Dev mode runs against an embedded chain that already knows this node;
    // production talks to the configured chain gateway.
    let chain: Arc<dyn ChainClient> = if args.dev_mode {
        Arc::new(DevChainClient::with_registered_node(1, &args.creator_node_endpoint).await)
    } else {
        match &args.chain_endpoint {
            Some(chain_endpoint) => Arc::new(HttpChainClient::new(chain_endpoint.clone())),
            None => {
                error!("--chain-endpoint is required outside dev mode");
                process::exit(BOOTSTRAP_FAILED_EXIT_CODE);
            }
        }
    };

    let main_loop = match creator_node::initialize(args, chain).await {
        Ok(main_loop) => main_loop,
        Err(e) => {
            error!("creator node failed to start: {e:#}");
            process::exit(BOOTSTRAP_FAILED_EXIT_CODE);
        }
    };

    let exit_code = main_loop.run().await?;
    process::exit(exit_code);
}
