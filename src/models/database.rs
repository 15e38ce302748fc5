use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use super::record::AudiusUserRecord;
use super::record::ClockLogRow;
use super::record::FileDescriptor;
use super::record::TrackRecord;
use super::record::UserRecord;

/// Composite key space of the single state database. Keeping every table in
/// one keyspace lets a multi-table commit go through one atomic write batch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StateKey {
    /// Wallet public key → user record.
    User(String),
    /// One clock-log row. Rows for a user are dense in `clock`, so a range
    /// is read with point lookups.
    Clock { user_uuid: Uuid, clock: u64 },
    File { user_uuid: Uuid, file_uuid: Uuid },
    Track {
        user_uuid: Uuid,
        track_blockchain_id: u64,
    },
    AudiusUser(Uuid),
    /// All file uuids of a user, for enumeration (truncate, skipped scan).
    FileIndex(Uuid),
    /// Reverse lookup for directory-addressed image files.
    DirEntry {
        dir_multihash: String,
        file_name: String,
    },
    /// All wallets known to this node, for the snapback iteration order.
    WalletIndex,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StateValue {
    User(UserRecord),
    Clock(ClockLogRow),
    File(Box<FileDescriptor>),
    Track(TrackRecord),
    AudiusUser(AudiusUserRecord),
    FileIndex(Vec<Uuid>),
    /// Multihash of the file stored under `(dir_multihash, file_name)`.
    DirEntry(String),
    WalletIndex(Vec<String>),
}

// A value read under the wrong key variant is a corrupt database or a
// programmer error; either way continuing would poison the state, so these
// accessors panic.
impl StateValue {
    pub fn as_user(self) -> UserRecord {
        match self {
            StateValue::User(user) => user,
            other => panic!("database invariant violated: expected user record, got {other:?}"),
        }
    }

    pub fn as_clock_row(self) -> ClockLogRow {
        match self {
            StateValue::Clock(row) => row,
            other => panic!("database invariant violated: expected clock row, got {other:?}"),
        }
    }

    pub fn as_file(self) -> FileDescriptor {
        match self {
            StateValue::File(file) => *file,
            other => panic!("database invariant violated: expected file row, got {other:?}"),
        }
    }

    pub fn as_track(self) -> TrackRecord {
        match self {
            StateValue::Track(track) => track,
            other => panic!("database invariant violated: expected track row, got {other:?}"),
        }
    }

    pub fn as_audius_user(self) -> AudiusUserRecord {
        match self {
            StateValue::AudiusUser(audius_user) => audius_user,
            other => {
                panic!("database invariant violated: expected audius-user row, got {other:?}")
            }
        }
    }

    pub fn as_file_index(self) -> Vec<Uuid> {
        match self {
            StateValue::FileIndex(file_uuids) => file_uuids,
            other => panic!("database invariant violated: expected file index, got {other:?}"),
        }
    }

    pub fn as_dir_entry(self) -> String {
        match self {
            StateValue::DirEntry(multihash) => multihash,
            other => panic!("database invariant violated: expected dir entry, got {other:?}"),
        }
    }

    pub fn as_wallet_index(self) -> Vec<String> {
        match self {
            StateValue::WalletIndex(wallets) => wallets,
            other => panic!("database invariant violated: expected wallet index, got {other:?}"),
        }
    }
}
