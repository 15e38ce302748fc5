use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// A user known to this node, identified on the network by wallet and
/// locally by an opaque uuid minted at first contact.
///
/// `clock` is `-1` while no clock-log rows exist for the user; otherwise it
/// equals the highest clock value among the user's rows.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub wallet_public_key: String,
    pub user_uuid: Uuid,
    pub clock: i64,
    pub latest_block_number: u64,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Which entity table a clock-log row points into.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum SourceTable {
    #[strum(serialize = "files")]
    Files,
    #[strum(serialize = "tracks")]
    Tracks,
    #[strum(serialize = "audius_users")]
    AudiusUsers,
}

/// Typed `(source_table, source_row_id)` reference carried by a clock-log
/// row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityRef {
    File(Uuid),
    Track(u64),
    AudiusUser(Uuid),
}

impl EntityRef {
    pub fn source_table(&self) -> SourceTable {
        match self {
            EntityRef::File(_) => SourceTable::Files,
            EntityRef::Track(_) => SourceTable::Tracks,
            EntityRef::AudiusUser(_) => SourceTable::AudiusUsers,
        }
    }

    pub fn source_row_id(&self) -> String {
        match self {
            EntityRef::File(file_uuid) => file_uuid.to_string(),
            EntityRef::Track(track_blockchain_id) => track_blockchain_id.to_string(),
            EntityRef::AudiusUser(user_uuid) => user_uuid.to_string(),
        }
    }
}

/// One mutation in a user's append-only log. For a given user the clock
/// values of these rows form the dense sequence `0, 1, …, user.clock`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClockLogRow {
    pub user_uuid: Uuid,
    pub clock: u64,
    pub source: EntityRef,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[strum(serialize = "track")]
    Track,
    #[strum(serialize = "image")]
    Image,
    #[strum(serialize = "metadata")]
    Metadata,
    #[strum(serialize = "copy320")]
    Copy320,
    #[strum(serialize = "dir")]
    Dir,
}

impl FileType {
    /// Track-audio variants are fetched in their own partition during sync so
    /// a flood of segment downloads cannot starve metadata and images.
    pub fn is_track_audio(self) -> bool {
        matches!(self, FileType::Track | FileType::Copy320)
    }
}

/// A content-addressed file owned by a user.
///
/// When `skipped` is false the bytes at `storage_path` exist on disk and
/// hash to `multihash`. When `skipped` is true the row is a placeholder
/// whose bytes the skipped-CID retry loop still owes us.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDescriptor {
    pub file_uuid: Uuid,
    pub user_uuid: Uuid,
    pub multihash: String,
    pub storage_path: PathBuf,
    pub file_type: FileType,
    pub track_blockchain_id: Option<u64>,
    pub dir_multihash: Option<String>,
    pub file_name: Option<String>,
    pub skipped: bool,
    pub clock: u64,
    pub created_at: DateTime<Utc>,
}

impl FileDescriptor {
    /// Image files inside a directory are addressed by directory hash plus
    /// file name and must be fetched through the directory path.
    pub fn requires_dir_fetch(&self) -> bool {
        self.file_name.is_some() && self.dir_multihash.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackRecord {
    pub track_blockchain_id: u64,
    pub user_uuid: Uuid,
    pub metadata_multihash: String,
    pub cover_art_multihash: Option<String>,
    pub clock: u64,
    pub created_at: DateTime<Utc>,
}

/// Per-user metadata snapshot. A singleton per user; repeated mutations
/// produce new clock-log rows pointing at the latest state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudiusUserRecord {
    pub user_uuid: Uuid,
    pub metadata_multihash: String,
    pub cover_photo: Option<String>,
    pub profile_picture: Option<String>,
    pub clock: u64,
}

#[cfg(test)]
mod record_tests {
    use super::*;

    #[test]
    fn entity_ref_renders_source_columns() {
        let file_uuid = Uuid::new_v4();
        let reference = EntityRef::File(file_uuid);
        assert_eq!(SourceTable::Files, reference.source_table());
        assert_eq!(file_uuid.to_string(), reference.source_row_id());

        let reference = EntityRef::Track(42);
        assert_eq!(SourceTable::Tracks, reference.source_table());
        assert_eq!("42", reference.source_row_id());
    }

    #[test]
    fn track_audio_partition_covers_both_audio_variants() {
        assert!(FileType::Track.is_track_audio());
        assert!(FileType::Copy320.is_track_audio());
        assert!(!FileType::Image.is_track_audio());
        assert!(!FileType::Metadata.is_track_audio());
        assert!(!FileType::Dir.is_track_audio());
    }
}
