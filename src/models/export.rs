use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use super::record::AudiusUserRecord;
use super::record::ClockLogRow;
use super::record::FileDescriptor;
use super::record::TrackRecord;
use super::record::UserRecord;

/// Everything a peer needs to reconstruct one user: the user row plus the
/// requested slice of the clock log and the entity rows it references.
///
/// An empty `clock_records` together with a user record signals "already up
/// to date" (the caller asked for clocks beyond our tip).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportedUser {
    #[serde(flatten)]
    pub user: UserRecord,
    pub clock_records: Vec<ClockLogRow>,
    pub files: Vec<FileDescriptor>,
    pub tracks: Vec<TrackRecord>,
    pub audius_users: Vec<AudiusUserRecord>,
}

impl ExportedUser {
    /// Schema invariant: clock records sorted ascending with no gaps, ending
    /// at the exported user's clock.
    pub fn clock_records_are_dense(&self) -> bool {
        if let Some(last) = self.clock_records.last() {
            if last.clock as i64 != self.user.clock {
                return false;
            }
        }
        self.clock_records
            .windows(2)
            .all(|pair| pair[1].clock == pair[0].clock + 1)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpfsIdentity {
    pub addresses: Vec<String>,
}

/// The export payload served to peers; `cnode_users` is keyed by wallet.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportPayload {
    pub cnode_users: BTreeMap<String, ExportedUser>,
    pub ipfs_id_obj: IpfsIdentity,
}

/// The wire envelope: `{ "data": { ... } }`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportEnvelope {
    pub data: ExportPayload,
}
