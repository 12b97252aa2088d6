// Copyright (c) 2025 SynaDB Contributors
// Licensed under the SynaDB License. See LICENSE file for details.

//! Read-caching, write-batching store decorator.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::{KeyRange, KvStore, SharedCounter};
use crate::error::Result;

/// Wraps a store with a read cache and a pending-write batch.
///
/// Reads first consult pending writes, then the cache, then the wrapped
/// store, so every read within one operation sees the same snapshot plus the
/// operation's own writes. Writes stay in memory until [`CachedStore::flush`]
/// applies them inside a single transaction on the wrapped store.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use synagraph::store::{CachedStore, KvStore, MemoryStore};
///
/// let backing = Arc::new(MemoryStore::new());
/// let cached = CachedStore::new(Arc::clone(&backing));
///
/// cached.put(b"k", b"v").unwrap();
/// assert_eq!(cached.get(b"k").unwrap(), Some(b"v".to_vec()));
/// assert!(backing.get(b"k").unwrap().is_none());
///
/// cached.flush().unwrap();
/// assert_eq!(backing.get(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
pub struct CachedStore<S: KvStore> {
    inner: S,
    reads: Mutex<HashMap<Vec<u8>, Option<Vec<u8>>>>,
    writes: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl<S: KvStore> CachedStore<S> {
    /// Wrap `inner` with an empty cache and batch.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: Mutex::new(HashMap::new()),
            writes: Mutex::new(BTreeMap::new()),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of buffered writes and removals.
    pub fn pending_writes(&self) -> usize {
        self.writes.lock().len()
    }

    /// Drop the read cache and every pending write.
    pub fn reset(&self) {
        self.reads.lock().clear();
        self.writes.lock().clear();
    }

    /// Apply pending writes to the wrapped store in one transaction.
    ///
    /// Returns the number of keys written or removed. The read cache is
    /// cleared afterwards so the next operation starts from fresh data.
    pub fn flush(&self) -> Result<usize> {
        let batch = std::mem::take(&mut *self.writes.lock());
        let count = batch.len();
        if count > 0 {
            self.inner.run_in_transaction(|| {
                for (key, value) in &batch {
                    match value {
                        Some(value) => self.inner.put(key, value)?,
                        None => self.inner.remove(key)?,
                    }
                }
                Ok(())
            })?;
        }
        self.reads.lock().clear();
        Ok(count)
    }
}

impl<S: KvStore> KvStore for CachedStore<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.lock().get(key) {
            return Ok(pending.clone());
        }
        if let Some(cached) = self.reads.lock().get(key) {
            return Ok(cached.clone());
        }
        let value = self.inner.get(key)?;
        self.reads.lock().insert(key.to_vec(), value.clone());
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes.lock().insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.writes.lock().insert(key.to_vec(), None);
        Ok(())
    }

    fn get_range(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let overlay: Vec<(Vec<u8>, Option<Vec<u8>>)> = {
            let writes = self.writes.lock();
            if range.is_empty() {
                Vec::new()
            } else {
                writes
                    .range(range.bounds())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
        };
        if overlay.is_empty() {
            return self.inner.get_range(range);
        }

        // Pending writes may hide or add entries, so read the whole range.
        let unlimited = KeyRange {
            reverse: false,
            limit: None,
            ..range.clone()
        };
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.inner.get_range(&unlimited)?.into_iter().collect();
        for (key, value) in overlay {
            match value {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }
        Ok(range.finish(merged.into_iter().collect()))
    }

    fn run_in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        self.inner.run_in_transaction(f)
    }

    fn shared_counter(&self, name: &str) -> SharedCounter {
        self.inner.shared_counter(name)
    }
}
