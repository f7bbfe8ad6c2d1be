//! etkv - etcd v3 API bridge over a transactional key-value backend.
//!
//! etkv gives any store that offers snapshot transactions the semantics etcd
//! clients rely on: a single global revision, multi-version history with
//! compaction, compare-and-swap transactions and TTL leases with keepalive.
//! The backend is consumed through traits; the gRPC transport and
//! authentication internals stay outside the crate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 external etcd v3 transport                      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       etcd adapter                              │
//! │    auth hook │ deadline │ envelope │ error mapping │ keepalive  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     MVCC and lease engines                      │
//! │  Revision Index │ Txn Translator │ Compactor │ Leases │ Sweeper │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Backend traits (AtomicKv, TxnKv)                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Component lifecycle
//! - [`core::time`] - Clocks and ticks
//! - [`core::error`] - Engine error taxonomy
//!
//! ## Backend
//! - [`backend`] - Backend capability traits
//! - [`backend::memory`] - In-memory reference backend
//!
//! ## MVCC
//! - [`mvcc::store`] - Revision Index
//! - [`mvcc::index`] - Per-key revision history
//! - [`mvcc::txn`] - Transaction Translator
//! - [`mvcc::compactor`] - History compaction
//!
//! ## Leases
//! - [`lease::engine`] - Lease Engine
//! - [`lease::sweeper`] - Expiry Sweeper
//!
//! ## Adapters
//! - [`adapters::etcd`] - etcd v3 service facade
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Revisions are strictly increasing and never reused
//! - All writes of one transaction share one revision
//! - Reads never observe a partially applied transaction
//! - A leased key never outlives its lease's revocation

// Core infrastructure
pub mod core;

// Backend capabilities
pub mod backend;

// MVCC engine
pub mod mvcc;

// Lease engine
pub mod lease;

// Protocol adapters
pub mod adapters;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use adapters::etcd;
