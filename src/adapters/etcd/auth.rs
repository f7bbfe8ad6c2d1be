//! Authorization hook for the etcd service.
//!
//! User, role and token management live outside this crate. The service only
//! asks an [`Authenticator`] whether a request may touch the keys it names,
//! and only when the authenticator reports itself enabled.

use async_trait::async_trait;

use super::kv::{DeleteRangeRequest, PutRequest, RangeRequest};
use super::txn::{RequestOp, TxnRequest};
use crate::core::error::EtkvResult;

/// Permission type for key operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Read permission (Range, compares).
    Read,
    /// Write permission (Put, Delete).
    Write,
}

/// What one request needs to be allowed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Key or `[key, range_end)` access.
    Key {
        key: Vec<u8>,
        range_end: Vec<u8>,
        permission: Permission,
    },
    /// Any lease operation.
    Lease,
    /// Compaction.
    Admin,
}

impl Access {
    pub fn read(req: &RangeRequest) -> Self {
        Self::Key {
            key: req.key.clone(),
            range_end: req.range_end.clone(),
            permission: Permission::Read,
        }
    }

    pub fn put(req: &PutRequest) -> Self {
        Self::Key {
            key: req.key.clone(),
            range_end: Vec::new(),
            permission: Permission::Write,
        }
    }

    pub fn delete(req: &DeleteRangeRequest) -> Self {
        Self::Key {
            key: req.key.clone(),
            range_end: req.range_end.clone(),
            permission: Permission::Write,
        }
    }

    /// Every key access a transaction may perform, across both branches.
    pub fn txn(req: &TxnRequest) -> Vec<Self> {
        let mut out = Vec::new();
        collect_txn(req, &mut out);
        out
    }
}

fn collect_txn(req: &TxnRequest, out: &mut Vec<Access>) {
    for compare in &req.compare {
        out.push(Access::Key {
            key: compare.key.clone(),
            range_end: compare.range_end.clone(),
            permission: Permission::Read,
        });
    }
    for op in req.success.iter().chain(&req.failure) {
        match op {
            RequestOp::Range(r) => out.push(Access::read(r)),
            RequestOp::Put(r) => out.push(Access::put(r)),
            RequestOp::DeleteRange(r) => out.push(Access::delete(r)),
            RequestOp::Txn(nested) => collect_txn(nested, out),
        }
    }
}

/// Pluggable authenticator capability.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether authentication is switched on.
    fn is_enabled(&self) -> bool;

    /// Allow or deny `access` for the caller presenting `token`.
    ///
    /// Fails with `AuthenticationRequired` when no usable token was
    /// presented, and `PermissionDenied` when the caller lacks the access.
    async fn authorize(&self, token: Option<&str>, access: &Access) -> EtkvResult<()>;
}

/// Authenticator used when auth is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthDisabled;

#[async_trait]
impl Authenticator for AuthDisabled {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn authorize(&self, _token: Option<&str>, _access: &Access) -> EtkvResult<()> {
        Ok(())
    }
}
