use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;
use uuid::Uuid;

use crate::database::leveldb::DbWrite;
use crate::database::ReplicaDatabases;
use crate::models::database::StateKey;
use crate::models::database::StateValue;
use crate::models::record::AudiusUserRecord;
use crate::models::record::ClockLogRow;
use crate::models::record::EntityRef;
use crate::models::record::FileDescriptor;
use crate::models::record::FileType;
use crate::models::record::TrackRecord;
use crate::models::record::UserRecord;
use crate::models::sync::SyncError;

type StateWrite = DbWrite<StateKey, StateValue>;

/// One entity mutation to be appended to a user's log. The store assigns the
/// clock value; callers never pick clocks themselves.
#[derive(Clone, Debug)]
pub enum Mutation {
    AddFile {
        file_uuid: Uuid,
        multihash: String,
        storage_path: PathBuf,
        file_type: FileType,
        track_blockchain_id: Option<u64>,
        dir_multihash: Option<String>,
        file_name: Option<String>,
        skipped: bool,
    },
    AddTrack {
        track_blockchain_id: u64,
        metadata_multihash: String,
        cover_art_multihash: Option<String>,
    },
    SetAudiusUser {
        metadata_multihash: String,
        cover_photo: Option<String>,
        profile_picture: Option<String>,
    },
}

/// A contiguous slice of one user's state, as assembled for export.
#[derive(Clone, Debug)]
pub struct UserSlice {
    pub user: UserRecord,
    pub clock_records: Vec<ClockLogRow>,
    pub files: Vec<FileDescriptor>,
    pub tracks: Vec<TrackRecord>,
    pub audius_users: Vec<AudiusUserRecord>,
}

/// The rows a sync commits after fetching and validating an export. All
/// rows still carry the exporting peer's `user_uuid`; the commit rewrites
/// them to the local one.
#[derive(Clone, Debug)]
pub struct ImportBatch {
    pub wallet: String,
    pub fetched_user: UserRecord,
    pub clock_records: Vec<ClockLogRow>,
    pub files: Vec<FileDescriptor>,
    pub tracks: Vec<TrackRecord>,
    pub audius_users: Vec<AudiusUserRecord>,
}

/// The per-user append-only clock log plus the materialized entity tables.
///
/// Every mutation appends a clock-log row with the next dense clock value in
/// the same write batch as the entity row itself, so the log and the tables
/// can never disagree.
#[derive(Clone, Debug)]
pub struct ClockLogStore {
    databases: Arc<TokioMutex<ReplicaDatabases>>,
}

impl ClockLogStore {
    pub fn new(databases: Arc<TokioMutex<ReplicaDatabases>>) -> Self {
        ClockLogStore { databases }
    }

    /// Append `mutations` to the user's log. `expected_clock` is the clock
    /// the caller last observed (`-1` for a user it believes to be new);
    /// a mismatch means a concurrent writer won the race.
    pub async fn append(
        &self,
        wallet: &str,
        expected_clock: i64,
        mutations: Vec<Mutation>,
    ) -> Result<i64, SyncError> {
        let databases = self.databases.lock().await;
        let now = Utc::now();

        let existing = get(&databases, &StateKey::User(wallet.to_string()))?
            .map(StateValue::as_user);
        let (mut user, is_new_user) = match existing {
            Some(user) => {
                if user.clock != expected_clock {
                    return Err(SyncError::ClockGap {
                        expected: expected_clock,
                        found: user.clock,
                    });
                }
                (user, false)
            }
            None => {
                if expected_clock != -1 {
                    return Err(SyncError::ClockGap {
                        expected: expected_clock,
                        found: -1,
                    });
                }
                let user = UserRecord {
                    wallet_public_key: wallet.to_string(),
                    user_uuid: Uuid::new_v4(),
                    clock: -1,
                    latest_block_number: 0,
                    last_login: None,
                    created_at: now,
                };
                (user, true)
            }
        };

        let user_uuid = user.user_uuid;
        let mut file_index = if is_new_user {
            vec![]
        } else {
            get(&databases, &StateKey::FileIndex(user_uuid))?
                .map(StateValue::as_file_index)
                .unwrap_or_default()
        };
        let mut batch_tracks: BTreeSet<u64> = BTreeSet::new();

        let mut writes: Vec<StateWrite> = vec![];
        let mut next_clock = user.clock;
        for mutation in mutations {
            next_clock += 1;
            let clock = next_clock as u64;
            let source = match mutation {
                Mutation::AddFile {
                    file_uuid,
                    multihash,
                    storage_path,
                    file_type,
                    track_blockchain_id,
                    dir_multihash,
                    file_name,
                    skipped,
                } => {
                    let key = StateKey::File {
                        user_uuid,
                        file_uuid,
                    };
                    if file_index.contains(&file_uuid) || get(&databases, &key)?.is_some() {
                        return Err(SyncError::ConstraintViolation(format!(
                            "file {file_uuid} already exists for user {user_uuid}"
                        )));
                    }
                    file_index.push(file_uuid);
                    let descriptor = FileDescriptor {
                        file_uuid,
                        user_uuid,
                        multihash,
                        storage_path,
                        file_type,
                        track_blockchain_id,
                        dir_multihash,
                        file_name,
                        skipped,
                        clock,
                        created_at: now,
                    };
                    push_dir_entry(&mut writes, &descriptor);
                    writes.push(DbWrite::Put(key, StateValue::File(Box::new(descriptor))));
                    EntityRef::File(file_uuid)
                }
                Mutation::AddTrack {
                    track_blockchain_id,
                    metadata_multihash,
                    cover_art_multihash,
                } => {
                    let key = StateKey::Track {
                        user_uuid,
                        track_blockchain_id,
                    };
                    if batch_tracks.contains(&track_blockchain_id)
                        || get(&databases, &key)?.is_some()
                    {
                        return Err(SyncError::ConstraintViolation(format!(
                            "track {track_blockchain_id} already exists for user {user_uuid}"
                        )));
                    }
                    batch_tracks.insert(track_blockchain_id);
                    writes.push(DbWrite::Put(
                        key,
                        StateValue::Track(TrackRecord {
                            track_blockchain_id,
                            user_uuid,
                            metadata_multihash,
                            cover_art_multihash,
                            clock,
                            created_at: now,
                        }),
                    ));
                    EntityRef::Track(track_blockchain_id)
                }
                Mutation::SetAudiusUser {
                    metadata_multihash,
                    cover_photo,
                    profile_picture,
                } => {
                    writes.push(DbWrite::Put(
                        StateKey::AudiusUser(user_uuid),
                        StateValue::AudiusUser(AudiusUserRecord {
                            user_uuid,
                            metadata_multihash,
                            cover_photo,
                            profile_picture,
                            clock,
                        }),
                    ));
                    EntityRef::AudiusUser(user_uuid)
                }
            };

            writes.push(DbWrite::Put(
                StateKey::Clock { user_uuid, clock },
                StateValue::Clock(ClockLogRow {
                    user_uuid,
                    clock,
                    source,
                    created_at: now,
                }),
            ));
        }

        user.clock = next_clock;
        writes.push(DbWrite::Put(
            StateKey::FileIndex(user_uuid),
            StateValue::FileIndex(file_index),
        ));
        if is_new_user {
            let mut wallets = self.wallet_index(&databases)?;
            wallets.push(wallet.to_string());
            writes.push(DbWrite::Put(
                StateKey::WalletIndex,
                StateValue::WalletIndex(wallets),
            ));
        }
        writes.push(DbWrite::Put(
            StateKey::User(wallet.to_string()),
            StateValue::User(user),
        ));

        databases
            .state
            .batch_write(writes)
            .map_err(|e| SyncError::CommitFailed(e.to_string()))?;
        debug!("appended to {wallet}, clock now {next_clock}");
        Ok(next_clock)
    }

    /// The slice `[clock_min, min(user.clock, clock_min + export_window)]`
    /// of a user's log, with the entity rows created in that range.
    ///
    /// `None` when the user is unknown here. A known user with
    /// `clock_min > user.clock` yields empty `clock_records`: the caller is
    /// already up to date.
    pub async fn slice(
        &self,
        wallet: &str,
        clock_min: u64,
        export_window: u64,
    ) -> Result<Option<UserSlice>, SyncError> {
        let databases = self.databases.lock().await;
        let Some(user) =
            get(&databases, &StateKey::User(wallet.to_string()))?.map(StateValue::as_user)
        else {
            return Ok(None);
        };

        let mut slice = UserSlice {
            user: user.clone(),
            clock_records: vec![],
            files: vec![],
            tracks: vec![],
            audius_users: vec![],
        };
        if user.clock < 0 || clock_min as i64 > user.clock {
            return Ok(Some(slice));
        }

        let user_uuid = user.user_uuid;
        let end = std::cmp::min(user.clock as u64, clock_min.saturating_add(export_window));
        let mut references: BTreeSet<EntityRef> = BTreeSet::new();
        for clock in clock_min..=end {
            let row = get(&databases, &StateKey::Clock { user_uuid, clock })?
                .map(StateValue::as_clock_row)
                .ok_or_else(|| {
                    SyncError::Db(format!("clock log of user {user_uuid} has no row {clock}"))
                })?;
            references.insert(row.source.clone());
            slice.clock_records.push(row);
        }

        // An entity is part of this slice only if its own clock falls in the
        // range; a snapshot re-mutated later ships with the later slice.
        let in_range = |clock: u64| clock >= clock_min && clock <= end;
        for reference in references {
            match reference {
                EntityRef::File(file_uuid) => {
                    let file = get(
                        &databases,
                        &StateKey::File {
                            user_uuid,
                            file_uuid,
                        },
                    )?
                    .map(StateValue::as_file)
                    .ok_or_else(|| {
                        SyncError::Db(format!("file {file_uuid} referenced but missing"))
                    })?;
                    if in_range(file.clock) {
                        slice.files.push(file);
                    }
                }
                EntityRef::Track(track_blockchain_id) => {
                    let track = get(
                        &databases,
                        &StateKey::Track {
                            user_uuid,
                            track_blockchain_id,
                        },
                    )?
                    .map(StateValue::as_track)
                    .ok_or_else(|| {
                        SyncError::Db(format!(
                            "track {track_blockchain_id} referenced but missing"
                        ))
                    })?;
                    if in_range(track.clock) {
                        slice.tracks.push(track);
                    }
                }
                EntityRef::AudiusUser(_) => {
                    let audius_user = get(&databases, &StateKey::AudiusUser(user_uuid))?
                        .map(StateValue::as_audius_user)
                        .ok_or_else(|| {
                            SyncError::Db(format!(
                                "audius-user row of {user_uuid} referenced but missing"
                            ))
                        })?;
                    if in_range(audius_user.clock) {
                        slice.audius_users.push(audius_user);
                    }
                }
            }
        }

        Ok(Some(slice))
    }

    /// Delete every row belonging to `wallet`. Only force-resync paths call
    /// this; a fresh import follows immediately.
    pub async fn truncate(&self, wallet: &str) -> Result<(), SyncError> {
        let databases = self.databases.lock().await;
        let Some(user) =
            get(&databases, &StateKey::User(wallet.to_string()))?.map(StateValue::as_user)
        else {
            return Ok(());
        };
        let user_uuid = user.user_uuid;

        let mut writes: Vec<StateWrite> = vec![DbWrite::Delete(StateKey::User(wallet.to_string()))];
        let mut track_ids: BTreeSet<u64> = BTreeSet::new();
        if user.clock >= 0 {
            for clock in 0..=user.clock as u64 {
                if let Some(row) = get(&databases, &StateKey::Clock { user_uuid, clock })?
                    .map(StateValue::as_clock_row)
                {
                    if let EntityRef::Track(track_blockchain_id) = row.source {
                        track_ids.insert(track_blockchain_id);
                    }
                    writes.push(DbWrite::Delete(StateKey::Clock { user_uuid, clock }));
                }
            }
        }
        for track_blockchain_id in track_ids {
            writes.push(DbWrite::Delete(StateKey::Track {
                user_uuid,
                track_blockchain_id,
            }));
        }

        let file_index = get(&databases, &StateKey::FileIndex(user_uuid))?
            .map(StateValue::as_file_index)
            .unwrap_or_default();
        for file_uuid in file_index {
            let key = StateKey::File {
                user_uuid,
                file_uuid,
            };
            if let Some(file) = get(&databases, &key)?.map(StateValue::as_file) {
                if let (Some(dir_multihash), Some(file_name)) =
                    (file.dir_multihash, file.file_name)
                {
                    writes.push(DbWrite::Delete(StateKey::DirEntry {
                        dir_multihash,
                        file_name,
                    }));
                }
            }
            writes.push(DbWrite::Delete(key));
        }
        writes.push(DbWrite::Delete(StateKey::FileIndex(user_uuid)));
        writes.push(DbWrite::Delete(StateKey::AudiusUser(user_uuid)));

        let wallets = self
            .wallet_index(&databases)?
            .into_iter()
            .filter(|known| known != wallet)
            .collect();
        writes.push(DbWrite::Put(
            StateKey::WalletIndex,
            StateValue::WalletIndex(wallets),
        ));

        databases
            .state
            .batch_write(writes)
            .map_err(|e| SyncError::CommitFailed(e.to_string()))?;
        debug!("truncated all state of {wallet}");
        Ok(())
    }

    /// Commit the outcome of a sync in one atomic batch. The local
    /// `user_uuid` is preserved when the user already exists; a fresh one is
    /// minted otherwise, and every imported row is rewritten to it.
    pub async fn commit_import(&self, import: ImportBatch) -> Result<(), SyncError> {
        let databases = self.databases.lock().await;

        let existing =
            get(&databases, &StateKey::User(import.wallet.clone()))?.map(StateValue::as_user);
        let is_new_user = existing.is_none();
        let local_uuid = existing
            .map(|user| user.user_uuid)
            .unwrap_or_else(Uuid::new_v4);

        let mut user = import.fetched_user;
        user.user_uuid = local_uuid;
        user.wallet_public_key = import.wallet.clone();

        let mut writes: Vec<StateWrite> = vec![];
        for mut row in import.clock_records {
            row.user_uuid = local_uuid;
            writes.push(DbWrite::Put(
                StateKey::Clock {
                    user_uuid: local_uuid,
                    clock: row.clock,
                },
                StateValue::Clock(row),
            ));
        }

        let mut file_index = get(&databases, &StateKey::FileIndex(local_uuid))?
            .map(StateValue::as_file_index)
            .unwrap_or_default();
        for mut file in import.files {
            file.user_uuid = local_uuid;
            if !file_index.contains(&file.file_uuid) {
                file_index.push(file.file_uuid);
            }
            push_dir_entry(&mut writes, &file);
            writes.push(DbWrite::Put(
                StateKey::File {
                    user_uuid: local_uuid,
                    file_uuid: file.file_uuid,
                },
                StateValue::File(Box::new(file)),
            ));
        }
        writes.push(DbWrite::Put(
            StateKey::FileIndex(local_uuid),
            StateValue::FileIndex(file_index),
        ));

        for mut track in import.tracks {
            track.user_uuid = local_uuid;
            writes.push(DbWrite::Put(
                StateKey::Track {
                    user_uuid: local_uuid,
                    track_blockchain_id: track.track_blockchain_id,
                },
                StateValue::Track(track),
            ));
        }
        for mut audius_user in import.audius_users {
            audius_user.user_uuid = local_uuid;
            writes.push(DbWrite::Put(
                StateKey::AudiusUser(local_uuid),
                StateValue::AudiusUser(audius_user),
            ));
        }

        if is_new_user {
            let mut wallets = self.wallet_index(&databases)?;
            if !wallets.contains(&import.wallet) {
                wallets.push(import.wallet.clone());
            }
            writes.push(DbWrite::Put(
                StateKey::WalletIndex,
                StateValue::WalletIndex(wallets),
            ));
        }
        writes.push(DbWrite::Put(
            StateKey::User(import.wallet.clone()),
            StateValue::User(user),
        ));

        databases
            .state
            .batch_write(writes)
            .map_err(|e| SyncError::CommitFailed(e.to_string()))
    }

    /// The user's current clock, `-1` when unknown here.
    pub async fn local_clock(&self, wallet: &str) -> Result<i64, SyncError> {
        Ok(self.user(wallet).await?.map(|user| user.clock).unwrap_or(-1))
    }

    pub async fn user(&self, wallet: &str) -> Result<Option<UserRecord>, SyncError> {
        let databases = self.databases.lock().await;
        Ok(get(&databases, &StateKey::User(wallet.to_string()))?.map(StateValue::as_user))
    }

    /// All wallets known to this node, in first-contact order.
    pub async fn wallets(&self) -> Result<Vec<String>, SyncError> {
        let databases = self.databases.lock().await;
        self.wallet_index(&databases)
    }

    /// Up to `limit` files still flagged skipped, paired with their wallet.
    pub async fn skipped_files(
        &self,
        limit: usize,
    ) -> Result<Vec<(String, FileDescriptor)>, SyncError> {
        let databases = self.databases.lock().await;
        let mut found = vec![];
        for wallet in self.wallet_index(&databases)? {
            let Some(user) =
                get(&databases, &StateKey::User(wallet.clone()))?.map(StateValue::as_user)
            else {
                continue;
            };
            let file_index = get(&databases, &StateKey::FileIndex(user.user_uuid))?
                .map(StateValue::as_file_index)
                .unwrap_or_default();
            for file_uuid in file_index {
                let file = get(
                    &databases,
                    &StateKey::File {
                        user_uuid: user.user_uuid,
                        file_uuid,
                    },
                )?
                .map(StateValue::as_file);
                if let Some(file) = file {
                    if file.skipped {
                        found.push((wallet.clone(), file));
                        if found.len() >= limit {
                            return Ok(found);
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    /// Clear a file's skipped flag after its bytes were fetched and
    /// verified. Callers must have written the verified bytes first.
    pub async fn clear_skipped(
        &self,
        user_uuid: Uuid,
        file_uuid: Uuid,
        storage_path: PathBuf,
    ) -> Result<(), SyncError> {
        let databases = self.databases.lock().await;
        let key = StateKey::File {
            user_uuid,
            file_uuid,
        };
        let Some(mut file) = get(&databases, &key)?.map(StateValue::as_file) else {
            return Err(SyncError::Db(format!(
                "cannot clear skipped flag: file {file_uuid} not found"
            )));
        };
        file.skipped = false;
        file.storage_path = storage_path;
        databases
            .state
            .put(&key, &StateValue::File(Box::new(file)))
            .map_err(|e| SyncError::Db(e.to_string()))
    }

    /// Multihash stored under a `(dir_multihash, file_name)` pair, for the
    /// directory-form content path.
    pub async fn dir_entry(
        &self,
        dir_multihash: &str,
        file_name: &str,
    ) -> Result<Option<String>, SyncError> {
        let databases = self.databases.lock().await;
        Ok(get(
            &databases,
            &StateKey::DirEntry {
                dir_multihash: dir_multihash.to_string(),
                file_name: file_name.to_string(),
            },
        )?
        .map(StateValue::as_dir_entry))
    }

    fn wallet_index(&self, databases: &ReplicaDatabases) -> Result<Vec<String>, SyncError> {
        Ok(get(databases, &StateKey::WalletIndex)?
            .map(StateValue::as_wallet_index)
            .unwrap_or_default())
    }
}

fn get(databases: &ReplicaDatabases, key: &StateKey) -> Result<Option<StateValue>, SyncError> {
    databases
        .state
        .get(key)
        .map_err(|e| SyncError::Db(e.to_string()))
}

fn push_dir_entry(writes: &mut Vec<StateWrite>, file: &FileDescriptor) {
    if let (Some(dir_multihash), Some(file_name)) = (&file.dir_multihash, &file.file_name) {
        writes.push(DbWrite::Put(
            StateKey::DirEntry {
                dir_multihash: dir_multihash.clone(),
                file_name: file_name.clone(),
            },
            StateValue::DirEntry(file.multihash.clone()),
        ));
    }
}

#[cfg(test)]
mod clock_log_tests {
    use super::*;
    use crate::tests::shared::test_clock_log_store;
    use crate::tests::shared::track_file_mutation;

    const WALLET: &str = "0xaa";

    #[tokio::test]
    async fn append_assigns_dense_clocks_from_zero() {
        let (store, _dir) = test_clock_log_store().await;

        let clock = store
            .append(
                WALLET,
                -1,
                vec![
                    Mutation::SetAudiusUser {
                        metadata_multihash: "mhash".to_string(),
                        cover_photo: None,
                        profile_picture: None,
                    },
                    track_file_mutation("payload-1"),
                    track_file_mutation("payload-2"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(2, clock);

        let slice = store.slice(WALLET, 0, 10_000).await.unwrap().unwrap();
        assert_eq!(2, slice.user.clock);
        let clocks: Vec<u64> = slice.clock_records.iter().map(|row| row.clock).collect();
        assert_eq!(vec![0, 1, 2], clocks);
        assert_eq!(2, slice.files.len());
        assert_eq!(1, slice.audius_users.len());
    }

    #[tokio::test]
    async fn stale_writers_hit_clock_gap() {
        let (store, _dir) = test_clock_log_store().await;
        store
            .append(WALLET, -1, vec![track_file_mutation("a")])
            .await
            .unwrap();

        // a second writer that still believes the user is new
        let result = store.append(WALLET, -1, vec![track_file_mutation("b")]).await;
        assert_eq!(
            Err(SyncError::ClockGap {
                expected: -1,
                found: 0
            }),
            result
        );

        // and one that observed clock 0 succeeds
        let clock = store
            .append(WALLET, 0, vec![track_file_mutation("b")])
            .await
            .unwrap();
        assert_eq!(1, clock);
    }

    #[tokio::test]
    async fn duplicate_primary_keys_are_rejected() {
        let (store, _dir) = test_clock_log_store().await;
        store
            .append(
                WALLET,
                -1,
                vec![Mutation::AddTrack {
                    track_blockchain_id: 7,
                    metadata_multihash: "m".to_string(),
                    cover_art_multihash: None,
                }],
            )
            .await
            .unwrap();

        let result = store
            .append(
                WALLET,
                0,
                vec![Mutation::AddTrack {
                    track_blockchain_id: 7,
                    metadata_multihash: "m2".to_string(),
                    cover_art_multihash: None,
                }],
            )
            .await;
        assert!(matches!(result, Err(SyncError::ConstraintViolation(_))));

        // the failed append left no trace
        assert_eq!(0, store.local_clock(WALLET).await.unwrap());
    }

    #[tokio::test]
    async fn slice_respects_window_and_lower_bound() {
        let (store, _dir) = test_clock_log_store().await;
        let mutations = (0..6)
            .map(|i| track_file_mutation(&format!("payload-{i}")))
            .collect();
        store.append(WALLET, -1, mutations).await.unwrap();

        let slice = store.slice(WALLET, 2, 2).await.unwrap().unwrap();
        let clocks: Vec<u64> = slice.clock_records.iter().map(|row| row.clock).collect();
        assert_eq!(vec![2, 3, 4], clocks);
        // entity rows outside the window stay out
        assert!(slice.files.iter().all(|f| (2..=4).contains(&f.clock)));

        // beyond the tip: the up-to-date signal
        let slice = store.slice(WALLET, 9, 2).await.unwrap().unwrap();
        assert!(slice.clock_records.is_empty());
        assert_eq!(5, slice.user.clock);

        assert!(store.slice("0xbb", 0, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncate_removes_every_row_and_is_idempotent() {
        let (store, _dir) = test_clock_log_store().await;
        store
            .append(
                WALLET,
                -1,
                vec![
                    track_file_mutation("a"),
                    Mutation::AddTrack {
                        track_blockchain_id: 3,
                        metadata_multihash: "m".to_string(),
                        cover_art_multihash: None,
                    },
                ],
            )
            .await
            .unwrap();

        store.truncate(WALLET).await.unwrap();
        assert_eq!(-1, store.local_clock(WALLET).await.unwrap());
        assert!(store.wallets().await.unwrap().is_empty());
        assert!(store.skipped_files(10).await.unwrap().is_empty());

        // truncating an absent user is a no-op
        store.truncate(WALLET).await.unwrap();
        assert_eq!(-1, store.local_clock(WALLET).await.unwrap());
    }

    #[tokio::test]
    async fn import_preserves_local_user_uuid() {
        let (store, _dir) = test_clock_log_store().await;
        store
            .append(WALLET, -1, vec![track_file_mutation("a")])
            .await
            .unwrap();
        let local_uuid = store.user(WALLET).await.unwrap().unwrap().user_uuid;

        // an import whose rows carry a foreign uuid
        let foreign_uuid = Uuid::new_v4();
        let now = Utc::now();
        store
            .commit_import(ImportBatch {
                wallet: WALLET.to_string(),
                fetched_user: UserRecord {
                    wallet_public_key: WALLET.to_string(),
                    user_uuid: foreign_uuid,
                    clock: 1,
                    latest_block_number: 9,
                    last_login: None,
                    created_at: now,
                },
                clock_records: vec![ClockLogRow {
                    user_uuid: foreign_uuid,
                    clock: 1,
                    source: EntityRef::AudiusUser(foreign_uuid),
                    created_at: now,
                }],
                files: vec![],
                tracks: vec![],
                audius_users: vec![AudiusUserRecord {
                    user_uuid: foreign_uuid,
                    metadata_multihash: "m".to_string(),
                    cover_photo: None,
                    profile_picture: None,
                    clock: 1,
                }],
            })
            .await
            .unwrap();

        let user = store.user(WALLET).await.unwrap().unwrap();
        assert_eq!(local_uuid, user.user_uuid);
        assert_eq!(1, user.clock);
        assert_eq!(9, user.latest_block_number);

        let slice = store.slice(WALLET, 1, 10).await.unwrap().unwrap();
        assert!(slice
            .clock_records
            .iter()
            .all(|row| row.user_uuid == local_uuid));
        assert!(slice
            .audius_users
            .iter()
            .all(|row| row.user_uuid == local_uuid));
    }

    #[tokio::test]
    async fn skipped_files_surface_until_cleared() {
        let (store, _dir) = test_clock_log_store().await;
        let mut mutation = track_file_mutation("payload");
        let file_uuid = match &mut mutation {
            Mutation::AddFile {
                skipped, file_uuid, ..
            } => {
                *skipped = true;
                *file_uuid
            }
            _ => unreachable!(),
        };
        store.append(WALLET, -1, vec![mutation]).await.unwrap();

        let found = store.skipped_files(10).await.unwrap();
        assert_eq!(1, found.len());
        assert_eq!(WALLET, found[0].0);

        let user_uuid = store.user(WALLET).await.unwrap().unwrap().user_uuid;
        store
            .clear_skipped(user_uuid, file_uuid, PathBuf::from("/tmp/payload"))
            .await
            .unwrap();
        assert!(store.skipped_files(10).await.unwrap().is_empty());
    }
}
