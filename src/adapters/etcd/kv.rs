//! etcd KV request and response types.
//!
//! Range, Put, DeleteRange and Compaction. Revisions of 0 mean "latest" in
//! requests. Every read is served from one fresh backend snapshot, so
//! `serializable` is accepted and has no further effect.

use serde::{Deserialize, Serialize};

pub use crate::mvcc::index::KeyValue;

/// Range request (Get).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeRequest {
    /// Key to get or start of range.
    pub key: Vec<u8>,
    /// End of range (exclusive). Empty for single key, `"\0"` for all keys >= key.
    pub range_end: Vec<u8>,
    /// Maximum number of keys to return (0 for no limit).
    pub limit: i64,
    /// Revision to read at (0 for latest).
    pub revision: i64,
    /// Sort order.
    pub sort_order: SortOrder,
    /// Sort target.
    pub sort_target: SortTarget,
    /// Serializable read.
    pub serializable: bool,
    /// Only return keys, not values.
    pub keys_only: bool,
    /// Only return count of keys.
    pub count_only: bool,
    /// Minimum mod_revision filter.
    pub min_mod_revision: i64,
    /// Maximum mod_revision filter.
    pub max_mod_revision: i64,
    /// Minimum create_revision filter.
    pub min_create_revision: i64,
    /// Maximum create_revision filter.
    pub max_create_revision: i64,
}

impl Default for RangeRequest {
    fn default() -> Self {
        Self {
            key: Vec::new(),
            range_end: Vec::new(),
            limit: 0,
            revision: 0,
            sort_order: SortOrder::None,
            sort_target: SortTarget::Key,
            serializable: false,
            keys_only: false,
            count_only: false,
            min_mod_revision: 0,
            max_mod_revision: 0,
            min_create_revision: 0,
            max_create_revision: 0,
        }
    }
}

impl RangeRequest {
    /// Request a single key at the latest revision.
    pub fn key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Request `[key, range_end)` at the latest revision.
    pub fn range(key: impl Into<Vec<u8>>, range_end: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            range_end: range_end.into(),
            ..Self::default()
        }
    }

    /// Read at a specific revision.
    pub fn at_revision(mut self, revision: i64) -> Self {
        self.revision = revision;
        self
    }

    /// Cap the number of returned keys.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `kv` passes the revision filters.
    pub fn accepts(&self, kv: &KeyValue) -> bool {
        (self.min_mod_revision == 0 || kv.mod_revision >= self.min_mod_revision)
            && (self.max_mod_revision == 0 || kv.mod_revision <= self.max_mod_revision)
            && (self.min_create_revision == 0 || kv.create_revision >= self.min_create_revision)
            && (self.max_create_revision == 0 || kv.create_revision <= self.max_create_revision)
    }
}

/// Sort order for range results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    None,
    Ascend,
    Descend,
}

/// Sort target for range results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortTarget {
    #[default]
    Key,
    Version,
    Create,
    Mod,
    Value,
}

/// Range response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Key-value pairs.
    pub kvs: Vec<KeyValue>,
    /// More results available (pagination).
    pub more: bool,
    /// Total count of keys matching the range.
    pub count: i64,
}

/// Put request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutRequest {
    /// Key to put.
    pub key: Vec<u8>,
    /// Value to put.
    pub value: Vec<u8>,
    /// Lease ID to attach (0 for none).
    pub lease: i64,
    /// Return previous key-value.
    pub prev_kv: bool,
    /// Keep the current value (update lease only).
    pub ignore_value: bool,
    /// Keep the current lease (update value only).
    pub ignore_lease: bool,
}

impl PutRequest {
    /// Put `value` at `key` without a lease.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Attach the key to a lease.
    pub fn with_lease(mut self, lease: i64) -> Self {
        self.lease = lease;
        self
    }

    /// Return the previous key-value.
    pub fn with_prev_kv(mut self) -> Self {
        self.prev_kv = true;
        self
    }
}

/// Put response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Previous key-value (if requested).
    pub prev_kv: Option<KeyValue>,
}

/// Delete request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
    /// Key to delete or start of range.
    pub key: Vec<u8>,
    /// End of range (exclusive). Empty for single key.
    pub range_end: Vec<u8>,
    /// Return previous key-values.
    pub prev_kv: bool,
}

impl DeleteRangeRequest {
    /// Delete a single key.
    pub fn key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Delete `[key, range_end)`.
    pub fn range(key: impl Into<Vec<u8>>, range_end: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            range_end: range_end.into(),
            prev_kv: false,
        }
    }
}

/// Delete response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRangeResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Number of keys deleted.
    pub deleted: i64,
    /// Previous key-values (if requested).
    pub prev_kvs: Vec<KeyValue>,
}

/// Compaction request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionRequest {
    /// Compact history below this revision.
    pub revision: i64,
    /// Wait until history is physically removed before responding.
    pub physical: bool,
}

/// Compaction response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionResponse {
    /// Response header.
    pub header: ResponseHeader,
}

/// Response header included in all etcd responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Cluster ID.
    pub cluster_id: u64,
    /// Member ID.
    pub member_id: u64,
    /// Store revision when the response was produced.
    pub revision: i64,
    /// Raft term.
    pub raft_term: u64,
}
