use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

/// The run-time configuration of a creator node.
///
/// `sp_id` is deliberately absent: the node's service-provider identity is
/// discovered at runtime by the identity-bootstrap loop, never configured.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// The publicly advertised endpoint of this node, as registered on chain.
    #[arg(long, default_value = "http://localhost:4000")]
    pub creator_node_endpoint: String,

    /// IP address to listen on for HTTP requests.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen_addr: IpAddr,

    /// Port to listen on for HTTP requests.
    #[arg(long, default_value_t = 4000)]
    pub port: u16,

    /// Directory containing the databases and the content-addressed storage.
    /// Defaults to a platform-specific data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Hex-encoded private key used to sign peer-to-peer requests.
    #[arg(long)]
    pub delegate_private_key: Option<String>,

    /// Base URL of the chain gateway serving service-provider and
    /// replica-set records. Required outside dev mode.
    #[arg(long)]
    pub chain_endpoint: Option<String>,

    /// Run with development timings: short chain polls, verbose defaults.
    #[arg(long, default_value_t = false)]
    pub dev_mode: bool,

    /// Interval between snapback controller ticks, in milliseconds.
    #[arg(long, default_value_t = 60_000)]
    pub snapback_interval_ms: u64,

    /// How many users the snapback controller inspects per tick.
    #[arg(long, default_value_t = 25)]
    pub snapback_batch_size: usize,

    /// How many file fetches a sync may run concurrently.
    #[arg(long, default_value_t = 10)]
    pub node_sync_file_save_max_concurrency: usize,

    /// Number of failed sync attempts for a user before failed files are
    /// committed as skipped instead of failing the sync.
    #[arg(long, default_value_t = 3)]
    pub sync_request_max_user_failure_count_before_skip: u64,

    /// Maximum number of clock records served by a single export.
    #[arg(long, default_value_t = 10_000)]
    pub export_window: u64,

    /// Refuse new sync work when the storage disk is fuller than this.
    #[arg(long, default_value_t = 95)]
    pub max_storage_used_percent: u8,

    /// Maximum number of users syncing concurrently on this node.
    #[arg(long, default_value_t = 100)]
    pub max_concurrency: usize,

    /// Only accept sync triggers from these peer endpoints. Empty means all.
    #[arg(long)]
    pub peer_whitelist: Vec<String>,

    /// Never accept sync triggers from these peer endpoints.
    #[arg(long)]
    pub peer_blacklist: Vec<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self::parse_from::<Vec<_>, String>(vec![])
    }
}

impl Args {
    /// The address the HTTP server binds to.
    pub fn own_listen_address(&self) -> (IpAddr, u16) {
        (self.listen_addr, self.port)
    }

    /// Whether a sync trigger from `peer_endpoint` may be accepted.
    pub fn peer_is_allowed(&self, peer_endpoint: &str) -> bool {
        if self
            .peer_blacklist
            .iter()
            .any(|blocked| blocked == peer_endpoint)
        {
            return false;
        }
        self.peer_whitelist.is_empty()
            || self
                .peer_whitelist
                .iter()
                .any(|allowed| allowed == peer_endpoint)
    }
}

#[cfg(test)]
mod cli_args_tests {
    use super::*;

    #[test]
    fn default_args_match_documented_defaults() {
        let args = Args::default();
        assert_eq!(10, args.node_sync_file_save_max_concurrency);
        assert_eq!(3, args.sync_request_max_user_failure_count_before_skip);
        assert_eq!(10_000, args.export_window);
        assert_eq!(100, args.max_concurrency);
        assert_eq!(60_000, args.snapback_interval_ms);
        assert!(!args.dev_mode);
        assert!(args.chain_endpoint.is_none());
    }

    #[test]
    fn whitelist_and_blacklist_gate_peers() {
        let mut args = Args::default();
        assert!(args.peer_is_allowed("http://cn2.audius.co"));

        args.peer_blacklist = vec!["http://cn2.audius.co".to_string()];
        assert!(!args.peer_is_allowed("http://cn2.audius.co"));
        assert!(args.peer_is_allowed("http://cn3.audius.co"));

        args.peer_whitelist = vec!["http://cn4.audius.co".to_string()];
        assert!(!args.peer_is_allowed("http://cn3.audius.co"));
        assert!(args.peer_is_allowed("http://cn4.audius.co"));
    }
}
