//! Multi-version store built on the backend traits.
//!
//! - `revision`: revision pairs, persisted counters and the regression guard.
//! - `keys`: reserved backend key layout.
//! - `index`: per-key revision history and stored entries.
//! - `writer`: MVCC reads and writes inside one backend transaction.
//! - `store`: the Revision Index (range, get, put, delete).
//! - `txn`: the Transaction Translator.
//! - `compactor`: history reclamation below a watermark.
//! - `retry`: bounded retry of conflicting transactions.

pub mod compactor;
pub mod index;
pub mod keys;
pub mod retry;
pub mod revision;
pub mod store;
pub mod txn;
pub mod writer;

pub use compactor::Compactor;
pub use index::{KeyRecord, KeyValue};
pub use retry::RetryPolicy;
pub use revision::{Revision, RevisionState};
pub use store::RevisionIndex;
pub use txn::TxnTranslator;
