// Copyright (c) 2025 SynaDB Contributors
// Licensed under the SynaDB License. See LICENSE file for details.

//! Ordered key-value storage used as the backing store of the vector index.
//!
//! The index never assumes a graph or vector database. Everything it needs is
//! captured by the [`KvStore`] trait:
//!
//! - point reads and writes (`get`, `put`, `remove`)
//! - ordered range scans (`get_keys`, `get_range`) driven by a [`KeyRange`]
//! - a scoped synchronous transaction (`run_in_transaction`)
//! - named atomic counters shared by every user of the store ([`SharedCounter`])
//!
//! Implementations:
//!
//! | Store | Purpose |
//! |-------|---------|
//! | [`MemoryStore`] | In-memory ordered map, used for tests and ephemeral indexes |
//! | [`LogStore`] | Durable append-only log with crash recovery |
//! | [`CachedStore`] | Decorator adding a read cache and a write batch over any store |

mod cached;
mod log;
mod memory;

pub use cached::CachedStore;
pub use log::{LogHeader, LogStore, LogStoreConfig, HEADER_SIZE, IS_TOMBSTONE};
pub use memory::MemoryStore;

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// Bounds and iteration options for a range scan.
///
/// `start` is inclusive unless `exclusive_start` is set, `end` is always
/// exclusive. `None` leaves that side unbounded. `reverse` iterates from the
/// high end of the range downward; `limit` caps the number of entries
/// returned after ordering.
///
/// # Examples
///
/// ```rust
/// use synagraph::store::{KeyRange, KvStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// for k in [b"a", b"b", b"c"] {
///     store.put(k, b"v").unwrap();
/// }
///
/// let last = store.get_keys(&KeyRange::all().reverse().limit(1)).unwrap();
/// assert_eq!(last, vec![b"c".to_vec()]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound of the range.
    pub start: Option<Vec<u8>>,
    /// Upper bound of the range (exclusive).
    pub end: Option<Vec<u8>>,
    /// Iterate from the upper bound downward.
    pub reverse: bool,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Exclude `start` itself from the range.
    pub exclusive_start: bool,
}

impl KeyRange {
    /// The whole keyspace in ascending order.
    pub fn all() -> Self {
        Self::default()
    }

    /// Keys in `[start, end)`.
    pub fn between(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            ..Default::default()
        }
    }

    /// Every key starting with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: Some(prefix.to_vec()),
            end: prefix_successor(prefix),
            ..Default::default()
        }
    }

    /// Iterate in descending key order.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Return at most `limit` entries.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Exclude the start key.
    pub fn exclusive_start(mut self) -> Self {
        self.exclusive_start = true;
        self
    }

    /// Bounds suitable for `BTreeMap::range`.
    pub fn bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let lower = match &self.start {
            Some(start) if self.exclusive_start => Bound::Excluded(start.clone()),
            Some(start) => Bound::Included(start.clone()),
            None => Bound::Unbounded,
        };
        let upper = match &self.end {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        (lower, upper)
    }

    /// Returns `true` if `key` falls inside the bounds.
    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = match &self.start {
            Some(start) if self.exclusive_start => key > start.as_slice(),
            Some(start) => key >= start.as_slice(),
            None => true,
        };
        let below_end = match &self.end {
            Some(end) => key < end.as_slice(),
            None => true,
        };
        above_start && below_end
    }

    /// Returns `true` if the bounds cannot match any key.
    ///
    /// `BTreeMap::range` panics on inverted bounds, so stores check this first.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => start >= end,
            _ => false,
        }
    }

    /// Apply `reverse` and `limit` to entries already collected in ascending order.
    pub(crate) fn finish<T>(&self, mut entries: Vec<T>) -> Vec<T> {
        if self.reverse {
            entries.reverse();
        }
        if let Some(limit) = self.limit {
            entries.truncate(limit);
        }
        entries
    }
}

/// Smallest key greater than every key starting with `prefix`, if any.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// A monotonically increasing counter shared by every holder of a clone.
///
/// Stores hand out counters by name so that every index instance opened on
/// the same store allocates ids from one sequence.
#[derive(Debug, Clone, Default)]
pub struct SharedCounter(Arc<AtomicU64>);

impl SharedCounter {
    /// Create a counter starting at `value`.
    pub fn new(value: u64) -> Self {
        Self(Arc::new(AtomicU64::new(value)))
    }

    /// Atomically increment and return the new value.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current value.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the counter to at least `value`. Never decreases it.
    pub fn raise_to(&self, value: u64) {
        self.0.fetch_max(value, Ordering::SeqCst);
    }
}

/// An ordered key-value store.
///
/// Keys and values are raw bytes; keys are ordered lexicographically.
/// Implementations must be safe to share across threads.
pub trait KvStore: Send + Sync {
    /// Read the value for `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Entries inside `range`, ordered as the range requests.
    fn get_range(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Keys inside `range`, ordered as the range requests.
    fn get_keys(&self, range: &KeyRange) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .get_range(range)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Run `f` while holding the store's transaction lock.
    ///
    /// Transactions are synchronous and may be nested on the same thread.
    fn run_in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>;

    /// The counter registered under `name`, created at zero on first use.
    fn shared_counter(&self, name: &str) -> SharedCounter;
}

impl<S: KvStore> KvStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        (**self).remove(key)
    }

    fn get_range(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).get_range(range)
    }

    fn get_keys(&self, range: &KeyRange) -> Result<Vec<Vec<u8>>> {
        (**self).get_keys(range)
    }

    fn run_in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        (**self).run_in_transaction(f)
    }

    fn shared_counter(&self, name: &str) -> SharedCounter {
        (**self).shared_counter(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
    }

    #[test]
    fn test_key_range_contains() {
        let range = KeyRange::between(b"b".to_vec(), b"d".to_vec());
        assert!(!range.contains(b"a"));
        assert!(range.contains(b"b"));
        assert!(range.contains(b"c"));
        assert!(!range.contains(b"d"));

        let exclusive = range.clone().exclusive_start();
        assert!(!exclusive.contains(b"b"));
        assert!(exclusive.contains(b"bb"));
    }

    #[test]
    fn test_key_range_empty() {
        assert!(KeyRange::between(b"d".to_vec(), b"b".to_vec()).is_empty());
        assert!(KeyRange::between(b"b".to_vec(), b"b".to_vec()).is_empty());
        assert!(!KeyRange::all().is_empty());
    }

    #[test]
    fn test_shared_counter() {
        let counter = SharedCounter::default();
        let clone = counter.clone();
        assert_eq!(counter.increment(), 1);
        assert_eq!(clone.increment(), 2);
        counter.raise_to(10);
        assert_eq!(clone.current(), 10);
        counter.raise_to(3);
        assert_eq!(counter.current(), 10);
    }
}
