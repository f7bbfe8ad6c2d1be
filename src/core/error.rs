//! Engine error taxonomy.
//!
//! Every engine operation returns [`EtkvError`]. Backend failures are wrapped
//! rather than surfaced verbatim; the etcd adapter maps the taxonomy onto gRPC
//! status codes and etcd's stable error strings (see
//! [`crate::adapters::etcd::errors`]).

use thiserror::Error;

use crate::backend::BackendError;

/// Common etkv error conditions.
#[derive(Debug, Error)]
pub enum EtkvError {
    /// Malformed request: bad TTL, bad revision bound, oversized transaction.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Key absent where absence is an error (e.g. `ignore_value` on a missing key).
    #[error("key not found")]
    KeyNotFound,

    /// Lease absent where absence is an error.
    #[error("lease {lease_id} not found")]
    LeaseNotFound { lease_id: i64 },

    /// Lease exists but its deadline has passed and it has not been swept yet.
    #[error("lease {lease_id} expired")]
    LeaseExpired { lease_id: i64 },

    /// Explicit lease id collides with an existing lease.
    #[error("lease {lease_id} already exists")]
    AlreadyExists { lease_id: i64 },

    /// Requested revision has been compacted.
    #[error("revision {revision} has been compacted; compaction floor is {compaction_floor}")]
    RevisionCompacted {
        revision: i64,
        compaction_floor: i64,
    },

    /// Requested revision is ahead of the current revision.
    #[error("revision {revision} is a future revision; current revision is {current}")]
    FutureRevision { revision: i64, current: i64 },

    /// Backend could not commit after bounded retries, or is unreachable.
    #[error("unavailable: {message}")]
    Unavailable { message: String },

    /// Request deadline elapsed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Authenticator denied the request.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Authentication is enabled and no credentials were supplied.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Invariant violation. Never swallowed.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// Error reported by the backend engine.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
}

impl EtkvError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is a transient backend conflict worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Backend(err) if err.is_retriable())
    }
}

/// Result type using EtkvError.
pub type EtkvResult<T> = Result<T, EtkvError>;
