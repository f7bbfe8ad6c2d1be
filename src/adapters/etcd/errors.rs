//! etcd adapter error mapping.
//!
//! Engine errors map to gRPC status codes and, where etcd clients match on
//! them, etcd's exact error strings:
//! - lease absent or expired → NOT_FOUND
//! - compacted or future revision → OUT_OF_RANGE
//! - exhausted conflict retries or unreachable backend → UNAVAILABLE
//!
//! Backend errors never reach the client verbatim.

use std::fmt;

use super::kv::ResponseHeader;
use crate::backend::BackendError;
use crate::core::error::EtkvError;

pub const ERR_KEY_NOT_FOUND: &str = "etcdserver: key not found";
pub const ERR_LEASE_NOT_FOUND: &str = "etcdserver: requested lease not found";
pub const ERR_LEASE_EXISTS: &str = "etcdserver: lease already exists";
pub const ERR_COMPACTED: &str = "etcdserver: mvcc: required revision has been compacted";
pub const ERR_FUTURE_REV: &str = "etcdserver: mvcc: required revision is a future revision";
pub const ERR_TIMEOUT: &str = "etcdserver: request timed out";
pub const ERR_USER_EMPTY: &str = "etcdserver: user name is empty";

/// Convert an engine error to an etcd-compatible error response.
pub fn to_etcd_error(err: &EtkvError) -> EtcdError {
    let (code, message) = match err {
        EtkvError::InvalidArgument { message } => {
            (GrpcCode::InvalidArgument, format!("etcdserver: {}", message))
        }
        EtkvError::KeyNotFound => (GrpcCode::InvalidArgument, ERR_KEY_NOT_FOUND.to_string()),
        EtkvError::LeaseNotFound { .. } | EtkvError::LeaseExpired { .. } => {
            (GrpcCode::NotFound, ERR_LEASE_NOT_FOUND.to_string())
        }
        EtkvError::AlreadyExists { .. } => {
            (GrpcCode::FailedPrecondition, ERR_LEASE_EXISTS.to_string())
        }
        EtkvError::RevisionCompacted { .. } => (GrpcCode::OutOfRange, ERR_COMPACTED.to_string()),
        EtkvError::FutureRevision { .. } => (GrpcCode::OutOfRange, ERR_FUTURE_REV.to_string()),
        EtkvError::Unavailable { message } => {
            (GrpcCode::Unavailable, format!("etcdserver: {}", message))
        }
        EtkvError::DeadlineExceeded => (GrpcCode::DeadlineExceeded, ERR_TIMEOUT.to_string()),
        EtkvError::PermissionDenied { message } => (
            GrpcCode::PermissionDenied,
            format!("etcdserver: permission denied: {}", message),
        ),
        EtkvError::AuthenticationRequired => {
            (GrpcCode::Unauthenticated, ERR_USER_EMPTY.to_string())
        }
        EtkvError::Internal { message } => (GrpcCode::Internal, format!("etcdserver: {}", message)),
        EtkvError::Backend(backend) => backend_status(backend),
    };
    EtcdError {
        code,
        message,
        header: None,
    }
}

fn backend_status(err: &BackendError) -> (GrpcCode, String) {
    match err {
        BackendError::Conflict { .. } | BackendError::TransactionTooOld => (
            GrpcCode::Unavailable,
            "etcdserver: backend transaction conflict".to_string(),
        ),
        BackendError::Unavailable { .. } => (
            GrpcCode::Unavailable,
            "etcdserver: backend unavailable".to_string(),
        ),
        BackendError::TransactionClosed => (
            GrpcCode::Internal,
            "etcdserver: backend transaction misuse".to_string(),
        ),
    }
}

/// gRPC status codes used by etcd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl GrpcCode {
    /// Numeric status code on the wire.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// etcd error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdError {
    /// gRPC status code.
    pub code: GrpcCode,
    /// Error message.
    pub message: String,
    /// Best-effort envelope for client diagnostics.
    pub header: Option<ResponseHeader>,
}

impl EtcdError {
    pub fn with_header(mut self, header: ResponseHeader) -> Self {
        self.header = Some(header);
        self
    }
}

impl fmt::Display for EtcdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for EtcdError {}

impl From<EtkvError> for EtcdError {
    fn from(err: EtkvError) -> Self {
        to_etcd_error(&err)
    }
}
