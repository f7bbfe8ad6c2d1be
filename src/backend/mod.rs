//! Backend capabilities consumed by the engine.
//!
//! The engine never depends on backend internals. It needs exactly two
//! capabilities:
//! - [`AtomicKv`] - single-key get/put/delete with linearizable read-after-write
//! - [`TxnKv`] / [`SnapshotTxn`] - multi-key snapshot transactions whose commit
//!   fails with [`BackendError::Conflict`] when a key read or written by the
//!   transaction was changed by a concurrent commit
//!
//! [`MemoryBackend`] implements both for embedding and tests.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryBackend;

/// Errors reported by a backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Optimistic commit lost a race with a concurrent writer.
    #[error("transaction conflict on key {}", String::from_utf8_lossy(key))]
    Conflict { key: Vec<u8> },

    /// Transaction snapshot is older than the backend's conflict history.
    #[error("transaction too old")]
    TransactionTooOld,

    /// Backend unreachable or refusing requests.
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// Transaction was already committed.
    #[error("transaction already committed")]
    TransactionClosed,
}

impl BackendError {
    /// Create an Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Whether retrying the whole transaction may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::TransactionTooOld)
    }
}

/// Result type using BackendError.
pub type BackendResult<T> = Result<T, BackendError>;

/// A key/value pair returned by [`SnapshotTxn::scan`].
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Single-key atomic operations.
#[async_trait]
pub trait AtomicKv: Send + Sync {
    /// Read the latest committed value of `key`.
    async fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>>;

    /// Write `value` to `key`.
    async fn put(&self, key: &[u8], value: &[u8]) -> BackendResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &[u8]) -> BackendResult<()>;
}

/// A snapshot transaction.
///
/// Reads observe the snapshot taken at begin plus this transaction's own
/// buffered writes. Nothing is visible to other transactions until
/// [`SnapshotTxn::commit`] succeeds. Dropping an uncommitted transaction
/// discards it without effect.
#[async_trait]
pub trait SnapshotTxn: Send {
    /// Read `key`.
    async fn get(&mut self, key: &[u8]) -> BackendResult<Option<Vec<u8>>>;

    /// Read keys in `[start, end)` in ascending order. `limit == 0` means
    /// unbounded.
    async fn scan(&mut self, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KvPair>>;

    /// Buffer a write.
    async fn set(&mut self, key: &[u8], value: &[u8]) -> BackendResult<()>;

    /// Buffer a delete.
    async fn delete(&mut self, key: &[u8]) -> BackendResult<()>;

    /// Atomically apply buffered writes.
    async fn commit(&mut self) -> BackendResult<()>;
}

/// Transaction factory.
#[async_trait]
pub trait TxnKv: Send + Sync {
    /// Transaction type produced by [`TxnKv::begin`].
    type Txn: SnapshotTxn + 'static;

    /// Open a new snapshot transaction.
    async fn begin(&self) -> BackendResult<Self::Txn>;
}

/// Everything the engine needs from a backend.
pub trait Backend: AtomicKv + TxnKv + 'static {}

impl<T: AtomicKv + TxnKv + 'static> Backend for T {}
