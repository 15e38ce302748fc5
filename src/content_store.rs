use std::path::PathBuf;

use sha3::Digest;
use sha3::Sha3_256;
use tracing::debug;

/// Content address of a byte string: lowercase hex of its Sha3-256 digest.
pub fn content_address(bytes: &[u8]) -> String {
    hex::encode(Sha3_256::digest(bytes))
}

#[derive(Debug, thiserror::Error)]
pub enum ContentStoreError {
    #[error("bytes hash to {actual}, expected {expected}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid multihash {0:?}")]
    InvalidMultihash(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The content-addressed file store: write-once files laid out as
/// `<root>/<multihash[0..2]>/<multihash>`.
///
/// Writes across distinct multihashes are safe to run concurrently; two
/// writers of the same multihash write identical bytes by construction.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: PathBuf) -> Self {
        ContentStore { root }
    }

    pub fn root_path(&self) -> &std::path::Path {
        &self.root
    }

    /// Where bytes for `multihash` live on disk.
    pub fn path_for(&self, multihash: &str) -> Result<PathBuf, ContentStoreError> {
        if multihash.len() < 3 || !multihash.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ContentStoreError::InvalidMultihash(multihash.to_string()));
        }
        Ok(self.root.join(&multihash[0..2]).join(multihash))
    }

    /// Write `bytes` under `multihash`, verifying the address first. The
    /// bytes never land on disk under an address they do not hash to.
    pub async fn write_verified(
        &self,
        multihash: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ContentStoreError> {
        let actual = content_address(bytes);
        if actual != multihash {
            return Err(ContentStoreError::HashMismatch {
                expected: multihash.to_string(),
                actual,
            });
        }

        let path = self.path_for(multihash)?;
        let parent = path.parent().expect("content paths always have a parent");
        tokio::fs::create_dir_all(parent).await?;
        tokio::fs::write(&path, bytes).await?;
        debug!("stored {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }

    pub async fn read(&self, multihash: &str) -> Result<Vec<u8>, ContentStoreError> {
        let path = self.path_for(multihash)?;
        Ok(tokio::fs::read(path).await?)
    }

    pub async fn contains(&self, multihash: &str) -> bool {
        match self.path_for(multihash) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
