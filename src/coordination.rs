use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Key builders for the shared coordination keyspace. Every consumer goes
/// through these so the key layout is written down in exactly one place.
pub mod keys {
    use crate::models::replica::SpId;

    /// Exclusive per-user sync lock.
    pub fn sync_lock(wallet: &str) -> String {
        format!("node_sync:{wallet}")
    }

    /// Job status record for a (task, request-id) pair.
    pub fn job_status(task: &str, request_id: &str) -> String {
        format!("{task}:::{request_id}")
    }

    /// Consecutive-failure counter consumed by the skip threshold.
    pub fn sync_failure(wallet: &str) -> String {
        format!("sync_failure:{wallet}")
    }

    /// Consecutive unreachable-probe counter for one (user, secondary).
    pub fn unhealthy(wallet: &str, sp_id: SpId) -> String {
        format!("unhealthy:{wallet}:{sp_id}")
    }

    /// Marker that a reconfiguration proposal is already in flight.
    pub fn reconfig(wallet: &str, sp_id: SpId) -> String {
        format!("reconfig:{wallet}:{sp_id}")
    }
}

/// The narrow key-value interface shared by per-user locks, job status
/// records and the snapback counters. Any store with last-writer-wins and
/// TTL semantics can implement it.
#[async_trait]
pub trait CoordinationStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>);
    /// Set `key` only if absent. Returns whether the write happened.
    async fn setnx(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool;
    async fn del(&self, key: &str);
    /// Add `member` to the set at `key`. Returns whether it was new.
    async fn sadd(&self, key: &str, member: &str) -> bool;
    async fn smembers(&self, key: &str) -> Vec<String>;
    async fn expire(&self, key: &str, ttl: Duration);

    /// Increment the integer at `key` and return the new value. Implemented
    /// over get/set; counters in this system are single-writer (the lock
    /// holder or the one snapback task), so read-modify-write suffices.
    async fn incr(&self, key: &str) -> i64 {
        let current = self
            .get(key)
            .await
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        self.set(key, &next.to_string(), None).await;
        next
    }

    /// The counter at `key`, zero when absent.
    async fn counter(&self, key: &str) -> i64 {
        self.get(key)
            .await
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
enum EntryValue {
    Scalar(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: EntryValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= Instant::now())
    }
}

/// In-process implementation of [`CoordinationStore`]. Expiry is lazy: an
/// expired entry is dropped the next time its key is touched.
#[derive(Debug, Default)]
pub struct MemoryCoordinationStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(Entry::is_expired) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match Self::live_entry(&mut entries, key)?.value.clone() {
            EntryValue::Scalar(value) => Some(value),
            EntryValue::Set(_) => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: EntryValue::Scalar(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    async fn setnx(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let mut entries = self.entries.lock().await;
        if Self::live_entry(&mut entries, key).is_some() {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: EntryValue::Scalar(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        true
    }

    async fn del(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    async fn sadd(&self, key: &str, member: &str) -> bool {
        let mut entries = self.entries.lock().await;
        match Self::live_entry(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                EntryValue::Set(members) => members.insert(member.to_string()),
                // last-writer-wins: a scalar key becomes a set
                value @ EntryValue::Scalar(_) => {
                    *value = EntryValue::Set(BTreeSet::from([member.to_string()]));
                    true
                }
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: EntryValue::Set(BTreeSet::from([member.to_string()])),
                        expires_at: None,
                    },
                );
                true
            }
        }
    }

    async fn smembers(&self, key: &str) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        match Self::live_entry(&mut entries, key) {
            Some(Entry {
                value: EntryValue::Set(members),
                ..
            }) => members.iter().cloned().collect(),
            _ => vec![],
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = Self::live_entry(&mut entries, key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }
}
