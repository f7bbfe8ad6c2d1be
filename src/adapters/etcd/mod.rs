//! etcd v3 adapter.
//!
//! Exposes the etcd v3 KV, Txn, Compaction and Lease surface over the MVCC
//! and lease engines. The gRPC transport is external: it decodes requests
//! into the types in [`kv`], [`txn`] and [`lease`] and calls [`EtcdService`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 external etcd v3 transport                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EtcdService                           │
//! │  - state gate and authorization                             │
//! │  - per-request deadline                                     │
//! │  - response envelope and error mapping                      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//! ┌────────────────┐  ┌──────────────────┐  ┌─────────────────┐
//! │ RevisionIndex  │  │  TxnTranslator   │  │   LeaseEngine   │
//! │   Compactor    │  │                  │  │ keepalive tasks │
//! └────────────────┘  └──────────────────┘  └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`service`] - request entry point
//! - [`kv`] - Range, Put, Delete and Compaction request/response types
//! - [`txn`] - transaction types, compare evaluation and validation
//! - [`lease`] - lease request/response types
//! - [`keepalive`] - per-stream keepalive sessions
//! - [`header`] - response envelope
//! - [`auth`] - authorization hook
//! - [`errors`] - error mapping to gRPC status codes

pub mod auth;
pub mod errors;
pub mod header;
pub mod keepalive;
pub mod kv;
pub mod lease;
pub mod service;
pub mod txn;

pub use auth::{Access, AuthDisabled, Authenticator, Permission};
pub use errors::{to_etcd_error, EtcdError, GrpcCode};
pub use header::{Envelope, HeaderBuilder};
pub use keepalive::{KeepAliveStream, SessionEnd};
pub use service::{EtcdResult, EtcdService, EtcdServiceConfig};
