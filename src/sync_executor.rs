use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::clock_log::ImportBatch;
use crate::content_store::ContentStoreError;
use crate::coordination::keys;
use crate::job_queue::JobCancelReceiver;
use crate::job_queue::JobHandler;
use crate::models::export::ExportedUser;
use crate::models::record::FileDescriptor;
use crate::models::record::FileType;
use crate::models::state::NodeState;
use crate::models::sync::SyncError;
use crate::models::sync::SyncJobParams;

/// No sync may hold a user's lock longer than this; the TTL doubles as the
/// crash backstop that frees the lock if the task dies without releasing.
const USER_LOCK_CEILING: Duration = Duration::from_secs(600);

/// Pulls one user's state from a peer replica and commits it locally: the
/// receiving half of the replication protocol.
#[derive(Clone, Debug)]
pub struct SyncExecutor {
    state: NodeState,
}

impl SyncExecutor {
    pub fn new(state: NodeState) -> Self {
        SyncExecutor { state }
    }

    /// Run one sync job. Wallets are processed independently and in order;
    /// one wallet's failure never blocks the next.
    pub async fn execute(
        &self,
        params: &SyncJobParams,
        cancel_rx: &JobCancelReceiver,
    ) -> Vec<(String, Result<(), SyncError>)> {
        let mut results = vec![];
        for wallet in &params.wallet {
            let result = if cancelled(cancel_rx) {
                Err(SyncError::Cancelled("shutdown requested".to_string()))
            } else {
                self.sync_wallet(
                    wallet,
                    &params.creator_node_endpoint,
                    params.force_resync,
                    cancel_rx,
                )
                .await
            };
            results.push((wallet.clone(), result));
        }
        results
    }

    /// Sync a single wallet from `source_endpoint` under the per-user
    /// exclusive lock. The lock is released on every exit path; if the task
    /// dies outright the TTL frees it.
    pub async fn sync_wallet(
        &self,
        wallet: &str,
        source_endpoint: &str,
        force_resync: bool,
        cancel_rx: &JobCancelReceiver,
    ) -> Result<(), SyncError> {
        self.ensure_storage_headroom()?;

        let lock_key = keys::sync_lock(wallet);
        let holder = Uuid::new_v4().to_string();
        let acquired = self
            .state
            .coordination
            .setnx(&lock_key, &holder, Some(USER_LOCK_CEILING))
            .await;
        if !acquired {
            let error = SyncError::SyncInProgress(wallet.to_string());
            self.state.history.record_failure(wallet, &error);
            return Err(error);
        }

        let outcome = tokio::time::timeout(
            USER_LOCK_CEILING,
            self.sync_wallet_locked(wallet, source_endpoint, force_resync, cancel_rx),
        )
        .await;
        self.state.coordination.del(&lock_key).await;

        let result = match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::error!(
                    "sync of {wallet} exceeded the {}s lock ceiling, aborting",
                    USER_LOCK_CEILING.as_secs()
                );
                Err(SyncError::Cancelled(format!(
                    "exceeded the {}s per-user lock ceiling",
                    USER_LOCK_CEILING.as_secs()
                )))
            }
        };

        match &result {
            Ok(()) => self.state.history.record_success(wallet),
            Err(error) => self.state.history.record_failure(wallet, error),
        }
        result
    }

    async fn sync_wallet_locked(
        &self,
        wallet: &str,
        source_endpoint: &str,
        force_resync: bool,
        cancel_rx: &JobCancelReceiver,
    ) -> Result<(), SyncError> {
        if force_resync {
            warn!("force resync requested for {wallet}, truncating local state");
            self.state.clock_log.truncate(wallet).await?;
        }
        let local_clock = self.state.clock_log.local_clock(wallet).await?;

        let payload = self
            .state
            .peer_client
            .fetch_export(
                source_endpoint,
                &[wallet.to_string()],
                (local_clock + 1) as u64,
            )
            .await?;
        let Some(exported) = payload.cnode_users.get(wallet) else {
            return Err(SyncError::ExportInvalid(format!(
                "export from {source_endpoint} does not contain {wallet}"
            )));
        };

        let fetched_clock = exported.user.clock;
        if fetched_clock < local_clock {
            return Err(SyncError::ExportRegression {
                local: local_clock,
                fetched: fetched_clock,
            });
        }
        if fetched_clock == local_clock {
            info!("{wallet} already at clock {local_clock}, nothing to sync");
            return Ok(());
        }
        if !exported.clock_records_are_dense() {
            return Err(SyncError::ExportInvalid(format!(
                "export of {wallet} has a gap in its clock records"
            )));
        }
        let Some(first_record) = exported.clock_records.first() else {
            return Err(SyncError::ExportInvalid(format!(
                "{source_endpoint} reports clock {fetched_clock} for {wallet} but sent no records"
            )));
        };
        if first_record.clock as i64 != local_clock + 1 {
            return Err(SyncError::ExportNonContiguous {
                expected: local_clock + 1,
                first: first_record.clock as i64,
            });
        }

        if cancelled(cancel_rx) {
            return Err(SyncError::Cancelled("shutdown requested".to_string()));
        }

        let content_sources = self.content_sources(wallet, Some(source_endpoint)).await;
        let failed_files = self
            .fetch_exported_content(exported, &content_sources)
            .await?;

        if failed_files.is_empty() {
            self.state
                .coordination
                .del(&keys::sync_failure(wallet))
                .await;
        } else {
            let attempt = self
                .state
                .coordination
                .incr(&keys::sync_failure(wallet))
                .await as u64;
            let threshold = self
                .state
                .cli
                .sync_request_max_user_failure_count_before_skip;
            if attempt < threshold {
                return Err(SyncError::ContentFetchFailed {
                    failed: failed_files.len(),
                    total: exported.files.len(),
                    attempt,
                });
            }
            warn!(
                "{wallet} failed content fetch {attempt} times, committing {} files as skipped",
                failed_files.len()
            );
            self.state
                .coordination
                .del(&keys::sync_failure(wallet))
                .await;
        }

        let import = self.build_import(wallet, exported, &failed_files)?;
        self.state.clock_log.commit_import(import).await?;

        info!(
            "synced {wallet} from {source_endpoint}: clock {local_clock} -> {fetched_clock}, {} skipped",
            failed_files.len()
        );
        Ok(())
    }

    /// Fetch every exported file's bytes, track-audio and non-track files as
    /// separate partitions, each in slices of the configured concurrency.
    /// Returns the uuids of files whose bytes could not be obtained.
    async fn fetch_exported_content(
        &self,
        exported: &ExportedUser,
        sources: &[String],
    ) -> Result<BTreeSet<Uuid>, SyncError> {
        let fetchable: Vec<&FileDescriptor> = exported
            .files
            .iter()
            // directory rows carry no payload; already-skipped rows are the
            // retry loop's problem, not this sync's
            .filter(|file| file.file_type != FileType::Dir && !file.skipped)
            .collect();
        let (track_files, non_track_files): (Vec<&FileDescriptor>, Vec<&FileDescriptor>) =
            fetchable
                .into_iter()
                .partition(|file| file.file_type.is_track_audio());

        let mut failed = BTreeSet::new();
        let slice_size = self.state.cli.node_sync_file_save_max_concurrency.max(1);
        for partition in [non_track_files, track_files] {
            for slice in partition.chunks(slice_size) {
                let attempts = join_all(
                    slice
                        .iter()
                        .map(|file| self.fetch_one_file(file, sources)),
                )
                .await;
                for (file, attempt) in slice.iter().zip(attempts) {
                    if let Err(reason) = attempt {
                        warn!(
                            "failed to fetch {} ({}): {reason}",
                            file.multihash, file.file_type
                        );
                        failed.insert(file.file_uuid);
                    }
                }
            }
        }
        Ok(failed)
    }

    /// Try each content source in order until one yields bytes that verify
    /// against the file's multihash.
    pub(crate) async fn fetch_one_file(
        &self,
        file: &FileDescriptor,
        sources: &[String],
    ) -> Result<PathBuf, String> {
        if self.state.content.contains(&file.multihash).await {
            return self
                .state
                .content
                .path_for(&file.multihash)
                .map_err(|e| e.to_string());
        }

        let mut last_failure = "no content sources available".to_string();
        for peer in sources {
            let fetched = if file.requires_dir_fetch() {
                let dir_multihash = file
                    .dir_multihash
                    .as_deref()
                    .expect("requires_dir_fetch implies dir_multihash");
                let file_name = file
                    .file_name
                    .as_deref()
                    .expect("requires_dir_fetch implies file_name");
                self.state
                    .peer_client
                    .fetch_dir_content(peer, dir_multihash, file_name, None)
                    .await
            } else {
                self.state
                    .peer_client
                    .fetch_content(peer, &file.multihash, None)
                    .await
            };

            let bytes = match fetched {
                Ok(bytes) => bytes,
                Err(e) => {
                    last_failure = e.to_string();
                    continue;
                }
            };
            match self.state.content.write_verified(&file.multihash, &bytes).await {
                Ok(path) => return Ok(path),
                Err(e @ ContentStoreError::HashMismatch { .. }) => {
                    warn!("{peer} served corrupt bytes for {}: {e}", file.multihash);
                    last_failure = e.to_string();
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        Err(last_failure)
    }

    /// The ordered list of peers to fetch content from: the preferred peer
    /// (the export source) first, then the rest of the user's replica set,
    /// self excluded. Re-resolved from chain on every call.
    pub(crate) async fn content_sources(
        &self,
        wallet: &str,
        preferred: Option<&str>,
    ) -> Vec<String> {
        let mut sources: Vec<String> = preferred.map(str::to_string).into_iter().collect();
        let replica_set = match self.state.chain.replica_set(wallet).await {
            Ok(replica_set) => replica_set,
            Err(e) => {
                warn!("replica-set lookup for {wallet} failed, probing no extra peers: {e}");
                None
            }
        };
        if let Some(replica_set) = replica_set {
            for sp_id in replica_set.members() {
                if let Ok(Some(endpoint)) = self.state.chain.endpoint_for(sp_id).await {
                    if endpoint != self.state.cli.creator_node_endpoint
                        && !sources.contains(&endpoint)
                    {
                        sources.push(endpoint);
                    }
                }
            }
        }
        sources
    }

    /// Assemble the commit batch: entity rows as exported, file rows with
    /// locally computed storage paths and the final skipped flags.
    fn build_import(
        &self,
        wallet: &str,
        exported: &ExportedUser,
        failed_files: &BTreeSet<Uuid>,
    ) -> Result<ImportBatch, SyncError> {
        let mut files = Vec::with_capacity(exported.files.len());
        for file in &exported.files {
            let mut file = file.clone();
            file.storage_path = self
                .state
                .content
                .path_for(&file.multihash)
                .map_err(|e| SyncError::ExportInvalid(e.to_string()))?;
            file.skipped = file.skipped || failed_files.contains(&file.file_uuid);
            files.push(file);
        }

        Ok(ImportBatch {
            wallet: wallet.to_string(),
            fetched_user: exported.user.clone(),
            clock_records: exported.clock_records.clone(),
            files,
            tracks: exported.tracks.clone(),
            audius_users: exported.audius_users.clone(),
        })
    }

    /// Refuse new sync work once the storage disk crosses the configured
    /// fill mark; replicating onto a full disk only manufactures skipped
    /// files.
    fn ensure_storage_headroom(&self) -> Result<(), SyncError> {
        let max_percent = self.state.cli.max_storage_used_percent;
        if let Some(used_percent) = storage_used_percent(&self.state.content.root_path()) {
            if used_percent > max_percent {
                return Err(SyncError::StorageFull {
                    used_percent,
                    max_percent,
                });
            }
        }
        Ok(())
    }
}

/// Fill percentage of the disk holding `path`: the disk with the longest
/// mount point that prefixes it. `None` when no disk matches.
fn storage_used_percent(path: &Path) -> Option<u8> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())?;
    let total = disk.total_space();
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(disk.available_space());
    Some(((used * 100) / total) as u8)
}

fn cancelled(cancel_rx: &JobCancelReceiver) -> bool {
    cancel_rx.has_changed().unwrap_or(true)
}

/// The job-queue face of the executor: decodes parameters, runs the job,
/// summarizes per-wallet outcomes into the status record.
#[derive(Debug)]
pub struct SyncJobHandler {
    executor: SyncExecutor,
}

impl SyncJobHandler {
    pub fn new(state: NodeState) -> Self {
        SyncJobHandler {
            executor: SyncExecutor::new(state),
        }
    }
}

#[async_trait]
impl JobHandler for SyncJobHandler {
    async fn run(
        &self,
        job_id: Uuid,
        params: serde_json::Value,
        cancel_rx: JobCancelReceiver,
    ) -> Result<serde_json::Value, String> {
        let params: SyncJobParams = serde_json::from_value(params)
            .map_err(|e| format!("malformed sync job parameters: {e}"))?;
        info!(
            "sync job {job_id}: {} wallet(s) from {}",
            params.wallet.len(),
            params.creator_node_endpoint
        );

        let results = self.executor.execute(&params, &cancel_rx).await;
        let mut summary = serde_json::Map::new();
        let mut first_error = None;
        for (wallet, result) in results {
            match result {
                Ok(()) => {
                    summary.insert(wallet, serde_json::Value::String("synced".to_string()));
                }
                Err(error) => {
                    summary.insert(
                        wallet.clone(),
                        serde_json::Value::String(error.kind().to_string()),
                    );
                    if first_error.is_none() {
                        first_error = Some(format!("sync of {wallet} failed: {error}"));
                    }
                }
            }
        }

        match first_error {
            None => Ok(serde_json::Value::Object(summary)),
            Some(message) => Err(message),
        }
    }
}
