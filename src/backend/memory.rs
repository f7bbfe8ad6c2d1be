//! In-memory backend backed by a `BTreeMap`.
//!
//! Transactions clone the map at begin and buffer writes. Commit takes the
//! write lock and validates against a bounded log of recent commits: if any
//! commit newer than the transaction's snapshot wrote a key this transaction
//! read, scanned, or wrote, the commit fails with [`BackendError::Conflict`].

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AtomicKv, BackendError, BackendResult, KvPair, SnapshotTxn, TxnKv};

/// Default number of commits retained for conflict detection.
pub const DEFAULT_CONFLICT_HISTORY: usize = 4096;

// ============================================================================
// Shared state
// ============================================================================

struct CommitRecord {
    version: u64,
    keys: Vec<Vec<u8>>,
}

struct Inner {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    version: u64,
    log: VecDeque<CommitRecord>,
    /// Every commit with a version above this is still in `log`.
    log_floor: u64,
    history: usize,
}

impl Inner {
    fn record(&mut self, keys: Vec<Vec<u8>>) -> u64 {
        self.version += 1;
        let version = self.version;
        if !keys.is_empty() {
            self.log.push_back(CommitRecord { version, keys });
        }
        while self.log.len() > self.history {
            if let Some(evicted) = self.log.pop_front() {
                self.log_floor = evicted.version;
            }
        }
        version
    }
}

/// In-memory backend.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
    injected_conflicts: Arc<AtomicU32>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::with_conflict_history(DEFAULT_CONFLICT_HISTORY)
    }

    /// Create an empty backend that remembers `history` commits for conflict
    /// detection. Transactions older than that fail with
    /// [`BackendError::TransactionTooOld`].
    pub fn with_conflict_history(history: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                data: BTreeMap::new(),
                version: 0,
                log: VecDeque::new(),
                log_floor: 0,
                history: history.max(1),
            })),
            injected_conflicts: Arc::new(AtomicU32::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of stored keys, engine metadata included.
    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    /// Whether the backend holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// All stored keys in ascending order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.inner.read().data.keys().cloned().collect()
    }

    /// Make the next `n` transaction commits fail with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Toggle simulated unavailability for every operation.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every read and transaction begin by `ms` milliseconds.
    pub fn set_latency_ms(&self, ms: u64) {
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("memory backend offline"));
        }
        Ok(())
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MemoryBackend")
            .field("keys", &inner.data.len())
            .field("version", &inner.version)
            .finish()
    }
}

#[async_trait]
impl AtomicKv for MemoryBackend {
    async fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.simulate_latency().await;
        self.check_available()?;
        Ok(self.inner.read().data.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.check_available()?;
        let mut inner = self.inner.write();
        inner.data.insert(key.to_vec(), value.to_vec());
        inner.record(vec![key.to_vec()]);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> BackendResult<()> {
        self.check_available()?;
        let mut inner = self.inner.write();
        if inner.data.remove(key).is_some() {
            inner.record(vec![key.to_vec()]);
        }
        Ok(())
    }
}

#[async_trait]
impl TxnKv for MemoryBackend {
    type Txn = MemoryTxn;

    async fn begin(&self) -> BackendResult<MemoryTxn> {
        self.simulate_latency().await;
        self.check_available()?;
        let inner = self.inner.read();
        Ok(MemoryTxn {
            backend: self.clone(),
            snapshot: inner.data.clone(),
            read_version: inner.version,
            writes: BTreeMap::new(),
            read_keys: Vec::new(),
            read_ranges: Vec::new(),
            committed: false,
        })
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Snapshot transaction over [`MemoryBackend`].
pub struct MemoryTxn {
    backend: MemoryBackend,
    snapshot: BTreeMap<Vec<u8>, Vec<u8>>,
    read_version: u64,
    /// Buffered mutations; `None` is a delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    read_keys: Vec<Vec<u8>>,
    read_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    committed: bool,
}

impl MemoryTxn {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.committed {
            return Err(BackendError::TransactionClosed);
        }
        Ok(())
    }

    fn touches(&self, key: &[u8]) -> bool {
        self.writes.contains_key(key)
            || self.read_keys.iter().any(|k| k.as_slice() == key)
            || self
                .read_ranges
                .iter()
                .any(|(start, end)| key >= start.as_slice() && key < end.as_slice())
    }
}

#[async_trait]
impl SnapshotTxn for MemoryTxn {
    async fn get(&mut self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        self.read_keys.push(key.to_vec());
        Ok(self.snapshot.get(key).cloned())
    }

    async fn scan(&mut self, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KvPair>> {
        self.ensure_open()?;
        if start >= end {
            return Ok(Vec::new());
        }
        let bounds = (
            Bound::Included(start.to_vec()),
            Bound::Excluded(end.to_vec()),
        );

        // Overlay buffered writes on the snapshot.
        let mut merged: BTreeMap<&[u8], &[u8]> = self
            .snapshot
            .range(bounds.clone())
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        for (k, v) in self.writes.range(bounds) {
            match v {
                Some(v) => merged.insert(k.as_slice(), v.as_slice()),
                None => merged.remove(k.as_slice()),
            };
        }

        let take = if limit == 0 { usize::MAX } else { limit };
        let out: Vec<KvPair> = merged
            .into_iter()
            .take(take)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        self.read_ranges.push((start.to_vec(), end.to_vec()));
        Ok(out)
    }

    async fn set(&mut self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.ensure_open()?;
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    async fn delete(&mut self, key: &[u8]) -> BackendResult<()> {
        self.ensure_open()?;
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    async fn commit(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        self.backend.check_available()?;
        if self.backend.take_injected_conflict() {
            return Err(BackendError::Conflict { key: Vec::new() });
        }

        let mut inner = self.backend.inner.write();
        if self.read_version < inner.log_floor {
            return Err(BackendError::TransactionTooOld);
        }
        for commit in inner.log.iter().rev() {
            if commit.version <= self.read_version {
                break;
            }
            if let Some(key) = commit.keys.iter().find(|k| self.touches(k)) {
                return Err(BackendError::Conflict { key: key.clone() });
            }
        }

        self.committed = true;
        if self.writes.is_empty() {
            return Ok(());
        }
        let writes = std::mem::take(&mut self.writes);
        let mut keys = Vec::with_capacity(writes.len());
        for (key, value) in writes {
            match value {
                Some(value) => {
                    inner.data.insert(key.clone(), value);
                }
                None => {
                    inner.data.remove(&key);
                }
            }
            keys.push(key);
        }
        inner.record(keys);
        Ok(())
    }
}
