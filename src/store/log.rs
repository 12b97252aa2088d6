//! Durable append-only log store.
//!
//! Every write appends a record to a single log file:
//!
//! ```text
//! +----------------------+-----------+-------------+
//! | LogHeader (15 bytes) | key bytes | value bytes |
//! +----------------------+-----------+-------------+
//! ```
//!
//! An in-memory ordered index maps each live key to the offset of its latest
//! value, so reads are one seek and one read. Removals append a tombstone
//! record. On open the index is rebuilt by scanning the log; corrupted or
//! truncated records are skipped with a warning. [`LogStore::compact`]
//! rewrites the file with only the live entries.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

use super::{KeyRange, KvStore, SharedCounter};
use crate::error::{Result, SynaError};

/// Flag indicating this record is a tombstone (deletion marker).
pub const IS_TOMBSTONE: u8 = 0x01;

/// Size of the [`LogHeader`] in bytes (8 + 2 + 4 + 1 = 15).
pub const HEADER_SIZE: usize = 15;

const VALID_FLAGS_MASK: u8 = IS_TOMBSTONE;

/// Largest value accepted by the recovery scan.
const MAX_VALUE_LEN: u32 = 1_000_000_000;

/// Fixed-size metadata written before every record.
///
/// All integers are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Microseconds since the Unix epoch at write time.
    pub timestamp: u64,
    /// Length of the key in bytes.
    pub key_len: u16,
    /// Length of the value in bytes.
    pub val_len: u32,
    /// Bit flags: [`IS_TOMBSTONE`].
    pub flags: u8,
}

impl LogHeader {
    /// Creates a header stamped with the current time.
    pub fn new(key_len: u16, val_len: u32, flags: u8) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self {
            timestamp,
            key_len,
            val_len,
            flags,
        }
    }

    /// Serializes the header to its on-disk form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..10].copy_from_slice(&self.key_len.to_le_bytes());
        buf[10..14].copy_from_slice(&self.val_len.to_le_bytes());
        buf[14] = self.flags;
        buf
    }

    /// Deserializes a header from its on-disk form.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&buf[0..8]);
        let mut key_len = [0u8; 2];
        key_len.copy_from_slice(&buf[8..10]);
        let mut val_len = [0u8; 4];
        val_len.copy_from_slice(&buf[10..14]);
        Self {
            timestamp: u64::from_le_bytes(timestamp),
            key_len: u16::from_le_bytes(key_len),
            val_len: u32::from_le_bytes(val_len),
            flags: buf[14],
        }
    }

    /// Returns `true` if the header has plausible values.
    ///
    /// Used during recovery to detect corrupted records.
    pub fn is_valid(&self) -> bool {
        self.key_len > 0 && self.val_len < MAX_VALUE_LEN && self.flags & !VALID_FLAGS_MASK == 0
    }

    fn is_tombstone(&self) -> bool {
        self.flags & IS_TOMBSTONE != 0
    }

    fn record_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.key_len as u64 + self.val_len as u64
    }
}

/// Runtime configuration for a [`LogStore`].
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    /// Sync to disk after every write.
    ///
    /// Inside [`KvStore::run_in_transaction`] the sync is deferred until the
    /// outermost transaction finishes, so a batch costs one `fsync`.
    pub sync_on_write: bool,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// Reject records the recovery scan would not read back.
fn check_record(key: &[u8], value_len: usize) -> Result<()> {
    if key.is_empty() {
        return Err(SynaError::EmptyKey);
    }
    if key.len() >= u16::MAX as usize {
        return Err(SynaError::KeyTooLong(key.len()));
    }
    if value_len >= MAX_VALUE_LEN as usize {
        return Err(SynaError::ValueTooLarge(value_len));
    }
    Ok(())
}

/// Location of a live value inside the log file.
#[derive(Debug, Clone, Copy)]
struct ValueRef {
    offset: u64,
    len: u32,
}

struct LogInner {
    file: File,
    index: BTreeMap<Vec<u8>, ValueRef>,
    file_len: u64,
    txn_depth: usize,
    unsynced: bool,
}

/// A durable, ordered key-value store backed by an append-only log file.
///
/// # Examples
///
/// ```rust,no_run
/// use synagraph::store::{KvStore, LogStore};
///
/// let store = LogStore::open("graph.log").unwrap();
/// store.put(b"key", b"value").unwrap();
/// assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
/// ```
pub struct LogStore {
    path: PathBuf,
    config: LogStoreConfig,
    inner: Mutex<LogInner>,
    counters: Mutex<HashMap<String, SharedCounter>>,
    txn_lock: ReentrantMutex<()>,
}

impl LogStore {
    /// Opens or creates a store at `path` with the default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, LogStoreConfig::default())
    }

    /// Opens or creates a store at `path`.
    ///
    /// If the file exists, the index is rebuilt by scanning every record.
    pub fn with_config(path: impl AsRef<Path>, config: LogStoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let file_len = file.metadata()?.len();

        let mut inner = LogInner {
            file,
            index: BTreeMap::new(),
            file_len,
            txn_depth: 0,
            unsynced: false,
        };
        if file_len > 0 {
            let (recovered, skipped) = inner.rebuild_index()?;
            debug!(
                path = %path.display(),
                recovered,
                skipped,
                live = inner.index.len(),
                "rebuilt log store index"
            );
        }

        Ok(Self {
            path,
            config,
            inner: Mutex::new(inner),
            counters: Mutex::new(HashMap::new()),
            txn_lock: ReentrantMutex::new(()),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Returns `true` if no live keys exist.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().index.is_empty()
    }

    /// Current size of the log file in bytes.
    pub fn file_len(&self) -> u64 {
        self.inner.lock().file_len
    }

    /// Flushes file contents and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        inner.unsynced = false;
        Ok(())
    }

    /// Rewrites the log with only the latest live value of each key.
    ///
    /// The compacted log is written to a temporary file and atomically
    /// renamed over the original. On failure the original stays intact.
    pub fn compact(&self) -> Result<()> {
        let _txn = self.txn_lock.lock();
        let mut inner = self.inner.lock();
        let temp_path = self.path.with_extension("compact.tmp");

        let mut temp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let live: Vec<(Vec<u8>, ValueRef)> =
            inner.index.iter().map(|(k, v)| (k.clone(), *v)).collect();
        for (key, value_ref) in &live {
            let value = inner.read_value(*value_ref)?;
            let header = LogHeader::new(key.len() as u16, value.len() as u32, 0);
            temp_file.write_all(&header.to_bytes())?;
            temp_file.write_all(key)?;
            temp_file.write_all(&value)?;
        }
        temp_file.sync_all()?;
        drop(temp_file);

        if let Err(e) = atomic_replace(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(SynaError::Io(e));
        }

        inner.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        inner.file_len = inner.file.metadata()?.len();
        inner.index.clear();
        inner.rebuild_index()?;
        inner.unsynced = false;
        debug!(path = %self.path.display(), live = inner.index.len(), "compacted log store");
        Ok(())
    }

    fn append(&self, key: &[u8], value: &[u8], flags: u8) -> Result<()> {
        check_record(key, value.len())?;

        let mut inner = self.inner.lock();
        let header = LogHeader::new(key.len() as u16, value.len() as u32, flags);
        let offset = inner.file_len;

        let mut record = Vec::with_capacity(header.record_len() as usize);
        record.extend_from_slice(&header.to_bytes());
        record.extend_from_slice(key);
        record.extend_from_slice(value);

        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(&record)?;

        if self.config.sync_on_write {
            if inner.txn_depth == 0 {
                inner.file.sync_data()?;
            } else {
                inner.unsynced = true;
            }
        }

        if header.is_tombstone() {
            inner.index.remove(key);
        } else {
            let value_offset = offset + HEADER_SIZE as u64 + key.len() as u64;
            inner.index.insert(
                key.to_vec(),
                ValueRef {
                    offset: value_offset,
                    len: value.len() as u32,
                },
            );
        }
        inner.file_len += header.record_len();
        Ok(())
    }
}

impl LogInner {
    fn read_value(&mut self, value_ref: ValueRef) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(value_ref.offset))?;
        let mut buf = vec![0u8; value_ref.len as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Rebuilds the in-memory index by scanning the log file.
    ///
    /// Bytes after the last readable record are cut off. Returns the number
    /// of records recovered and skipped.
    fn rebuild_index(&mut self) -> Result<(usize, usize)> {
        self.file.seek(SeekFrom::Start(0))?;

        let mut offset = 0u64;
        let mut recovered = 0usize;
        let mut skipped = 0usize;

        while offset + HEADER_SIZE as u64 <= self.file_len {
            let mut header_buf = [0u8; HEADER_SIZE];
            self.file.seek(SeekFrom::Start(offset))?;
            match self.file.read_exact(&mut header_buf) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let header = LogHeader::from_bytes(&header_buf);

            if !header.is_valid() {
                warn!(offset, "invalid log header, scanning for next valid record");
                skipped += 1;
                match self.scan_for_next_valid_entry(offset + 1)? {
                    Some(next) => {
                        offset = next;
                        continue;
                    }
                    None => break,
                }
            }

            if offset + header.record_len() > self.file_len {
                warn!(offset, "truncated log record at end of file");
                skipped += 1;
                break;
            }

            let mut key = vec![0u8; header.key_len as usize];
            self.file.read_exact(&mut key)?;

            if header.is_tombstone() {
                self.index.remove(&key);
            } else {
                let value_offset = offset + HEADER_SIZE as u64 + header.key_len as u64;
                self.index.insert(
                    key,
                    ValueRef {
                        offset: value_offset,
                        len: header.val_len,
                    },
                );
            }
            recovered += 1;
            offset += header.record_len();
        }

        if offset < self.file_len {
            // Drop the unreadable tail so new records start at a clean offset.
            warn!(offset, dropped = self.file_len - offset, "truncating log tail");
            self.file.set_len(offset)?;
            self.file_len = offset;
        }
        if skipped > 0 {
            warn!(recovered, skipped, "log recovery skipped corrupted records");
        }
        Ok((recovered, skipped))
    }

    /// Scans forward byte by byte for a plausible header.
    fn scan_for_next_valid_entry(&mut self, start: u64) -> Result<Option<u64>> {
        // Allow timestamps from year 2000 to year 2100 (in microseconds).
        const MIN_TIMESTAMP: u64 = 946_684_800_000_000;
        const MAX_TIMESTAMP: u64 = 4_102_444_800_000_000;

        let mut offset = start;
        let mut header_buf = [0u8; HEADER_SIZE];
        while offset + HEADER_SIZE as u64 <= self.file_len {
            self.file.seek(SeekFrom::Start(offset))?;
            match self.file.read_exact(&mut header_buf) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            let header = LogHeader::from_bytes(&header_buf);
            let plausible_time = header.timestamp == 0
                || (MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&header.timestamp);
            if header.is_valid() && plausible_time && offset + header.record_len() <= self.file_len
            {
                return Ok(Some(offset));
            }
            offset += 1;
        }
        Ok(None)
    }
}

impl KvStore for LogStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        match inner.index.get(key).copied() {
            Some(value_ref) => inner.read_value(value_ref).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.append(key, value, 0)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        if !self.inner.lock().index.contains_key(key) {
            return Ok(());
        }
        self.append(key, &[], IS_TOMBSTONE)
    }

    fn get_range(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock();
        let refs: Vec<(Vec<u8>, ValueRef)> = {
            let iter = inner.index.range(range.bounds()).map(|(k, v)| (k.clone(), *v));
            match (range.reverse, range.limit) {
                (true, Some(limit)) => iter.rev().take(limit).collect(),
                (true, None) => iter.rev().collect(),
                (false, Some(limit)) => iter.take(limit).collect(),
                (false, None) => iter.collect(),
            }
        };
        refs.into_iter()
            .map(|(key, value_ref)| Ok((key, inner.read_value(value_ref)?)))
            .collect()
    }

    fn get_keys(&self, range: &KeyRange) -> Result<Vec<Vec<u8>>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock();
        let keys = inner.index.range(range.bounds()).map(|(k, _)| k.clone());
        let keys: Vec<_> = match (range.reverse, range.limit) {
            (true, Some(limit)) => keys.rev().take(limit).collect(),
            (true, None) => keys.rev().collect(),
            (false, Some(limit)) => keys.take(limit).collect(),
            (false, None) => keys.collect(),
        };
        Ok(keys)
    }

    fn run_in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        let _guard = self.txn_lock.lock();
        self.inner.lock().txn_depth += 1;
        let result = f();

        let mut inner = self.inner.lock();
        inner.txn_depth -= 1;
        if inner.txn_depth == 0 && inner.unsynced {
            inner.file.sync_data()?;
            inner.unsynced = false;
        }
        result
    }

    fn shared_counter(&self, name: &str) -> SharedCounter {
        self.counters
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

/// Atomically replaces `dst` with `src`.
#[cfg(unix)]
fn atomic_replace(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::rename(src, dst)
}

#[cfg(windows)]
fn atomic_replace(src: &Path, dst: &Path) -> std::io::Result<()> {
    // rename fails on Windows while the destination exists or is locked
    const MAX_RETRIES: u32 = 3;

    for attempt in 0..MAX_RETRIES {
        match std::fs::rename(src, dst) {
            Ok(()) => return Ok(()),
            Err(_) if attempt < MAX_RETRIES - 1 => {
                let _ = std::fs::remove_file(dst);
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Err(e) => return Err(e),
        }
    }
    std::fs::rename(src, dst)
}
