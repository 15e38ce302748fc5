use std::collections::HashMap;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// The error taxonomy of the sync subsystem. Every expected failure surfaces
/// as one of these kinds; the HTTP layer exposes the kind string verbatim.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    /// Schema or transport error from the export peer. Snapback retries at
    /// the next tick.
    #[error("peer export request failed: {0}")]
    ExportInvalid(String),

    /// The peer reports a lower clock than we hold locally.
    #[error("peer clock {fetched} is behind local clock {local}")]
    ExportRegression { local: i64, fetched: i64 },

    /// The export's first clock record does not continue our local sequence.
    #[error("export starts at clock {first}, expected {expected}")]
    ExportNonContiguous { expected: i64, first: i64 },

    /// Content fetches failed and the per-user failure count is still below
    /// the skip threshold.
    #[error("{failed} of {total} content fetches failed (attempt {attempt})")]
    ContentFetchFailed {
        failed: usize,
        total: usize,
        attempt: u64,
    },

    /// Another executor holds the per-user lock.
    #[error("sync already in progress for wallet {0}")]
    SyncInProgress(String),

    /// The atomic commit's write batch was rejected; nothing was applied.
    #[error("database commit failed: {0}")]
    CommitFailed(String),

    /// A concurrent writer advanced the user's clock between staging and
    /// commit.
    #[error("clock advanced concurrently: expected {expected}, found {found}")]
    ClockGap { expected: i64, found: i64 },

    /// A mutation would overwrite an existing row's primary key.
    #[error("duplicate row: {0}")]
    ConstraintViolation(String),

    /// The node has not finished identity bootstrap yet.
    #[error("node identity not yet bootstrapped")]
    BootstrapPending,

    /// Storage-engine failure outside of a commit.
    #[error("database error: {0}")]
    Db(String),

    /// Disk too full to take on new sync work.
    #[error("storage used {used_percent}% exceeds maximum {max_percent}%")]
    StorageFull { used_percent: u8, max_percent: u8 },

    /// The task was told to wind down (shutdown, or the per-user lock's
    /// hard ceiling elapsed) and aborted cleanly.
    #[error("sync aborted: {0}")]
    Cancelled(String),
}

impl SyncError {
    /// Stable machine-readable kind string, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::ExportInvalid(_) => "ExportInvalid",
            SyncError::ExportRegression { .. } => "ExportRegression",
            SyncError::ExportNonContiguous { .. } => "ExportNonContiguous",
            SyncError::ContentFetchFailed { .. } => "ContentFetchFailed",
            SyncError::SyncInProgress(_) => "SyncInProgress",
            SyncError::CommitFailed(_) => "CommitFailed",
            SyncError::ClockGap { .. } => "ClockGap",
            SyncError::ConstraintViolation(_) => "ConstraintViolation",
            SyncError::BootstrapPending => "BootstrapPending",
            SyncError::Db(_) => "Db",
            SyncError::StorageFull { .. } => "StorageFull",
            SyncError::Cancelled(_) => "Cancelled",
        }
    }

    /// Whether the caller may simply retry later. Fatal kinds require new
    /// input (a different export, operator intervention) to make progress.
    pub fn is_retriable(&self) -> bool {
        match self {
            SyncError::ExportInvalid(_)
            | SyncError::ContentFetchFailed { .. }
            | SyncError::SyncInProgress(_)
            | SyncError::CommitFailed(_)
            | SyncError::ClockGap { .. }
            | SyncError::BootstrapPending
            | SyncError::Db(_)
            | SyncError::StorageFull { .. }
            | SyncError::Cancelled(_) => true,
            SyncError::ExportRegression { .. }
            | SyncError::ExportNonContiguous { .. }
            | SyncError::ConstraintViolation(_) => false,
        }
    }
}

/// Parameters of one sync job, as received on the `/sync` trigger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncJobParams {
    pub wallet: Vec<String>,
    pub creator_node_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub force_resync: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncOutcomeKind {
    Success,
    Failure,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletSyncStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_outcome: Option<SyncOutcomeKind>,
    pub last_error_kind: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl WalletSyncStats {
    fn new() -> Self {
        WalletSyncStats {
            success_count: 0,
            failure_count: 0,
            last_outcome: None,
            last_error_kind: None,
            last_attempt_at: None,
        }
    }
}

/// In-process aggregator of sync outcomes per wallet, read by the health
/// surface and by tests.
#[derive(Debug, Default)]
pub struct SyncHistory {
    per_wallet: Mutex<HashMap<String, WalletSyncStats>>,
}

impl SyncHistory {
    pub fn record_success(&self, wallet: &str) {
        let mut guard = self.per_wallet.lock().unwrap();
        let stats = guard
            .entry(wallet.to_string())
            .or_insert_with(WalletSyncStats::new);
        stats.success_count += 1;
        stats.last_outcome = Some(SyncOutcomeKind::Success);
        stats.last_error_kind = None;
        stats.last_attempt_at = Some(Utc::now());
    }

    pub fn record_failure(&self, wallet: &str, error: &SyncError) {
        let mut guard = self.per_wallet.lock().unwrap();
        let stats = guard
            .entry(wallet.to_string())
            .or_insert_with(WalletSyncStats::new);
        stats.failure_count += 1;
        stats.last_outcome = Some(SyncOutcomeKind::Failure);
        stats.last_error_kind = Some(error.kind().to_string());
        stats.last_attempt_at = Some(Utc::now());
    }

    pub fn stats_for(&self, wallet: &str) -> Option<WalletSyncStats> {
        self.per_wallet.lock().unwrap().get(wallet).cloned()
    }
}

#[cfg(test)]
mod sync_model_tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable_strings() {
        assert_eq!(
            "ExportNonContiguous",
            SyncError::ExportNonContiguous {
                expected: 4,
                first: 6
            }
            .kind()
        );
        assert_eq!("SyncInProgress", SyncError::SyncInProgress("0xaa".into()).kind());
        assert_eq!("BootstrapPending", SyncError::BootstrapPending.kind());
    }

    #[test]
    fn regression_and_gap_are_fatal_while_fetch_failures_retry() {
        assert!(!SyncError::ExportRegression {
            local: 5,
            fetched: 3
        }
        .is_retriable());
        assert!(!SyncError::ExportNonContiguous {
            expected: 4,
            first: 6
        }
        .is_retriable());
        assert!(SyncError::ContentFetchFailed {
            failed: 2,
            total: 10,
            attempt: 1
        }
        .is_retriable());
        assert!(SyncError::SyncInProgress("0xaa".into()).is_retriable());
    }

    #[test]
    fn history_tracks_latest_outcome_per_wallet() {
        let history = SyncHistory::default();
        history.record_success("0xaa");
        history.record_failure("0xaa", &SyncError::SyncInProgress("0xaa".into()));

        let stats = history.stats_for("0xaa").unwrap();
        assert_eq!(1, stats.success_count);
        assert_eq!(1, stats.failure_count);
        assert_eq!(Some(SyncOutcomeKind::Failure), stats.last_outcome);
        assert_eq!(Some("SyncInProgress".to_string()), stats.last_error_kind);
        assert!(history.stats_for("0xbb").is_none());
    }
}
