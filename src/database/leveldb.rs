use std::marker::PhantomData;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use leveldb::batch::Batch;
use leveldb::batch::WriteBatch;
use leveldb::database::kv::KV;
use leveldb::database::Database;
use leveldb::options::Options;
use leveldb::options::ReadOptions;
use leveldb::options::WriteOptions;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One write in an atomic batch.
#[derive(Debug, Clone)]
pub enum DbWrite<K, V> {
    Put(K, V),
    Delete(K),
}

/// A leveldb with bincode-serialized keys and values.
///
/// The wrapper is synchronous; callers hold it behind a tokio mutex so that
/// database access is a suspension point like any other.
pub struct TypedLevelDb<K, V> {
    db: Database,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> std::fmt::Debug for TypedLevelDb<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedLevelDb").finish()
    }
}

impl<K, V> TypedLevelDb<K, V>
where
    K: Serialize,
    V: Serialize + DeserializeOwned,
{
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create database directory {}", path.display()))?;
        let mut options = Options::new();
        options.create_if_missing = true;
        let db = Database::open(path, &options)
            .with_context(|| format!("Failed to open leveldb at {}", path.display()))?;
        Ok(TypedLevelDb {
            db,
            _phantom: PhantomData,
        })
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let key_bytes = Self::key_bytes(key);
        let value_bytes = self
            .db
            .get_u8(&ReadOptions::new(), &key_bytes)
            .context("leveldb get failed")?;
        match value_bytes {
            None => Ok(None),
            Some(bytes) => {
                let value =
                    bincode::deserialize(&bytes).context("failed to decode database value")?;
                Ok(Some(value))
            }
        }
    }

    pub fn put(&self, key: &K, value: &V) -> Result<()> {
        let key_bytes = Self::key_bytes(key);
        let value_bytes = Self::value_bytes(value);
        self.db
            .put_u8(&WriteOptions::new(), &key_bytes, &value_bytes)
            .context("leveldb put failed")
    }

    pub fn delete(&self, key: &K) -> Result<()> {
        let key_bytes = Self::key_bytes(key);
        self.db
            .delete_u8(&WriteOptions::new(), &key_bytes)
            .context("leveldb delete failed")
    }

    /// Apply all writes atomically: either every entry lands or none does.
    pub fn batch_write(&self, writes: impl IntoIterator<Item = DbWrite<K, V>>) -> Result<()> {
        let mut batch = WriteBatch::new();
        for write in writes {
            match write {
                DbWrite::Put(key, value) => {
                    batch.put_u8(&Self::key_bytes(&key), &Self::value_bytes(&value));
                }
                DbWrite::Delete(key) => {
                    batch.delete_u8(&Self::key_bytes(&key));
                }
            }
        }
        self.db
            .write(&WriteOptions::new(), &batch)
            .context("leveldb batch write failed")
    }

    fn key_bytes(key: &K) -> Vec<u8> {
        bincode::serialize(key).expect("database keys serialize infallibly")
    }

    fn value_bytes(value: &V) -> Vec<u8> {
        bincode::serialize(value).expect("database values serialize infallibly")
    }
}

#[cfg(test)]
mod leveldb_tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    enum TestKey {
        Row(u64),
        Meta,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    struct TestValue {
        name: String,
        count: u64,
    }

    fn test_db() -> (TypedLevelDb<TestKey, TestValue>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = TypedLevelDb::open(&dir.path().join("db")).unwrap();
        (db, dir)
    }

    #[test]
    fn put_get_delete_round_trip() {
        let (db, _dir) = test_db();
        let value = TestValue {
            name: "track".to_string(),
            count: 3,
        };

        assert!(db.get(&TestKey::Row(1)).unwrap().is_none());
        db.put(&TestKey::Row(1), &value).unwrap();
        assert_eq!(Some(value), db.get(&TestKey::Row(1)).unwrap());

        db.delete(&TestKey::Row(1)).unwrap();
        assert!(db.get(&TestKey::Row(1)).unwrap().is_none());
    }

    #[test]
    fn batch_applies_puts_and_deletes_together() {
        let (db, _dir) = test_db();
        let old = TestValue {
            name: "old".to_string(),
            count: 0,
        };
        db.put(&TestKey::Meta, &old).unwrap();

        db.batch_write(vec![
            DbWrite::Delete(TestKey::Meta),
            DbWrite::Put(
                TestKey::Row(7),
                TestValue {
                    name: "new".to_string(),
                    count: 7,
                },
            ),
        ])
        .unwrap();

        assert!(db.get(&TestKey::Meta).unwrap().is_none());
        assert_eq!(7, db.get(&TestKey::Row(7)).unwrap().unwrap().count);
    }
}
