use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use directories::ProjectDirs;

/// Resolves the node's on-disk layout: databases and content storage both
/// live under one root directory.
#[derive(Debug, Clone)]
pub struct DataDirectory {
    data_dir: PathBuf,
}

impl DataDirectory {
    /// Get the data directory, either the user-supplied path or a
    /// platform-specific default.
    ///
    /// The directory is not created by this call.
    pub fn get(root_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match root_dir {
            Some(dir) => dir,
            None => ProjectDirs::from("org", "creator-node", "creator-node")
                .context("Could not determine a default data directory")?
                .data_dir()
                .to_path_buf(),
        };

        Ok(DataDirectory { data_dir })
    }

    /// Create directory `path` if it does not exist.
    pub async fn create_dir_if_not_exists(path: &Path) -> Result<()> {
        if path.exists() && !path.is_dir() {
            bail!("{} exists but is not a directory", path.display());
        }
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory {}", path.display()))
    }

    pub fn root_dir_path(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// The leveldb holding user records, the clock log and entity tables.
    pub fn state_database_dir_path(&self) -> PathBuf {
        self.data_dir.join("databases").join("state")
    }

    /// The content-addressed file store.
    pub fn content_dir_path(&self) -> PathBuf {
        self.data_dir.join("file_storage")
    }
}

impl fmt::Display for DataDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data_dir.display())
    }
}
