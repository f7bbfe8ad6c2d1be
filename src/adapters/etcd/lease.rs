//! etcd lease request and response types.
//!
//! - Grant/revoke/keepalive go through the lease engine's backend transactions
//! - Expiry uses wall-clock ticks from an injectable clock
//! - TimeToLive and Leases never fail on a missing lease

use serde::{Deserialize, Serialize};

use super::kv::ResponseHeader;

/// Lease grant request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseGrantRequest {
    /// Requested TTL in seconds.
    pub ttl: i64,
    /// Requested lease ID (0 for auto-assign).
    pub id: i64,
}

/// Lease grant response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseGrantResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Assigned lease ID.
    pub id: i64,
    /// Granted TTL in seconds.
    pub ttl: i64,
}

/// Lease revoke request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseRevokeRequest {
    /// Lease ID to revoke.
    pub id: i64,
}

/// Lease revoke response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseRevokeResponse {
    /// Response header.
    pub header: ResponseHeader,
}

/// Lease keepalive request (stream message).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseKeepAliveRequest {
    /// Lease ID to keep alive.
    pub id: i64,
}

/// Lease keepalive response (stream message).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseKeepAliveResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Lease ID.
    pub id: i64,
    /// New TTL in seconds, 0 if the lease is gone.
    pub ttl: i64,
}

/// Lease time-to-live request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseTimeToLiveRequest {
    /// Lease ID to query.
    pub id: i64,
    /// Include attached keys in response.
    pub keys: bool,
}

/// Lease time-to-live response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseTimeToLiveResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Lease ID.
    pub id: i64,
    /// Remaining TTL in seconds, -1 if the lease does not exist.
    pub ttl: i64,
    /// Granted TTL in seconds.
    pub granted_ttl: i64,
    /// Attached keys (if requested).
    pub keys: Vec<Vec<u8>>,
}

/// Lease leases request (list all leases).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseLeasesRequest {}

/// Lease status (for listing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseStatus {
    /// Lease ID.
    pub id: i64,
}

/// Lease leases response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseLeasesResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// List of active leases.
    pub leases: Vec<LeaseStatus>,
}
