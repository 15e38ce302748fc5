pub mod leveldb;

use anyhow::Result;

use crate::config_models::data_directory::DataDirectory;
use crate::models::database::StateKey;
use crate::models::database::StateValue;
use leveldb::TypedLevelDb;

/// The node's databases. Everything replica-related lives in one keyspace so
/// multi-table updates commit atomically; see [`StateKey`].
#[derive(Debug)]
pub struct ReplicaDatabases {
    pub state: TypedLevelDb<StateKey, StateValue>,
}

impl ReplicaDatabases {
    pub fn open(data_directory: &DataDirectory) -> Result<Self> {
        let state = TypedLevelDb::open(&data_directory.state_database_dir_path())?;
        Ok(ReplicaDatabases { state })
    }
}
