//! In-memory ordered store.

use std::collections::{BTreeMap, HashMap};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use super::{KeyRange, KvStore, SharedCounter};
use crate::error::Result;

/// An ordered in-memory key-value store.
///
/// Cloning is not supported; share it behind an `Arc` so that several index
/// instances observe the same data and counters.
///
/// # Examples
///
/// ```rust
/// use synagraph::store::{KvStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.put(b"key", b"value").unwrap();
/// assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
/// store.remove(b"key").unwrap();
/// assert!(store.get(b"key").unwrap().is_none());
/// ```
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    counters: Mutex<HashMap<String, SharedCounter>>,
    txn_lock: ReentrantMutex<()>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn get_range(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.data.read();
        let iter = data
            .range(range.bounds())
            .map(|(k, v)| (k.clone(), v.clone()));

        // Avoid cloning the whole range when only a few entries are wanted.
        let entries: Vec<_> = match (range.reverse, range.limit) {
            (true, Some(limit)) => iter.rev().take(limit).collect(),
            (true, None) => iter.rev().collect(),
            (false, Some(limit)) => iter.take(limit).collect(),
            (false, None) => iter.collect(),
        };
        Ok(entries)
    }

    fn run_in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        let _guard = self.txn_lock.lock();
        f()
    }

    fn shared_counter(&self, name: &str) -> SharedCounter {
        self.counters
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}
