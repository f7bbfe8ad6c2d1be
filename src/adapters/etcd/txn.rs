//! etcd transaction types.
//!
//! Txn (Compare/Then/Else): every compare is evaluated against one snapshot,
//! then exactly one branch is applied. Structural validation happens before
//! any backend work.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::kv::{
    DeleteRangeRequest, DeleteRangeResponse, KeyValue, PutRequest, PutResponse, RangeRequest,
    RangeResponse, ResponseHeader,
};
use crate::core::error::EtkvError;
use crate::mvcc::keys::in_range;

/// Transaction request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxnRequest {
    /// Compare predicates (all must pass for success branch).
    pub compare: Vec<Compare>,
    /// Operations to execute if all compares succeed.
    pub success: Vec<RequestOp>,
    /// Operations to execute if any compare fails.
    pub failure: Vec<RequestOp>,
}

/// Compare predicate for transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compare {
    /// Compare result type.
    pub result: CompareResult,
    /// Compare target type.
    pub target: CompareTarget,
    /// Key to compare.
    pub key: Vec<u8>,
    /// Value for comparison (interpretation depends on target).
    pub target_union: CompareTargetUnion,
    /// Range end for multi-key compares. Every key in range must match.
    pub range_end: Vec<u8>,
}

/// Compare result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareResult {
    Equal,
    Greater,
    Less,
    NotEqual,
}

/// Compare target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareTarget {
    Version,
    Create,
    Mod,
    Value,
    Lease,
}

/// Compare target value union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareTargetUnion {
    /// Version to compare.
    Version(i64),
    /// Create revision to compare.
    CreateRevision(i64),
    /// Mod revision to compare.
    ModRevision(i64),
    /// Value to compare.
    Value(Vec<u8>),
    /// Lease to compare.
    Lease(i64),
}

/// Request operation within a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestOp {
    /// Range (Get) operation.
    Range(RangeRequest),
    /// Put operation.
    Put(PutRequest),
    /// Delete operation.
    DeleteRange(DeleteRangeRequest),
    /// Nested transaction.
    Txn(TxnRequest),
}

/// Response operation from a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseOp {
    /// Range response.
    Range(RangeResponse),
    /// Put response.
    Put(PutResponse),
    /// Delete response.
    DeleteRange(DeleteRangeResponse),
    /// Nested transaction response.
    Txn(TxnResponse),
}

impl ResponseOp {
    /// Header of the wrapped response.
    pub fn header_mut(&mut self) -> &mut ResponseHeader {
        match self {
            Self::Range(r) => &mut r.header,
            Self::Put(r) => &mut r.header,
            Self::DeleteRange(r) => &mut r.header,
            Self::Txn(r) => &mut r.header,
        }
    }
}

/// Transaction response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxnResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Whether the compare succeeded.
    pub succeeded: bool,
    /// Responses from executed operations.
    pub responses: Vec<ResponseOp>,
}

impl TxnResponse {
    /// Set `header` on this response and every nested response.
    pub fn stamp_headers(&mut self, header: ResponseHeader) {
        self.header = header;
        for op in &mut self.responses {
            match op {
                ResponseOp::Txn(nested) => nested.stamp_headers(header),
                other => *other.header_mut() = header,
            }
        }
    }
}

impl CompareTargetUnion {
    /// Target this value kind compares against.
    pub fn target(&self) -> CompareTarget {
        match self {
            Self::Version(_) => CompareTarget::Version,
            Self::CreateRevision(_) => CompareTarget::Create,
            Self::ModRevision(_) => CompareTarget::Mod,
            Self::Value(_) => CompareTarget::Value,
            Self::Lease(_) => CompareTarget::Lease,
        }
    }
}

impl Compare {
    fn new(key: impl Into<Vec<u8>>, result: CompareResult, target_union: CompareTargetUnion) -> Self {
        Self {
            result,
            target: target_union.target(),
            key: key.into(),
            target_union,
            range_end: Vec::new(),
        }
    }

    /// Compare a key's version.
    pub fn version(key: impl Into<Vec<u8>>, result: CompareResult, version: i64) -> Self {
        Self::new(key, result, CompareTargetUnion::Version(version))
    }

    /// Compare a key's create revision.
    pub fn create_revision(key: impl Into<Vec<u8>>, result: CompareResult, revision: i64) -> Self {
        Self::new(key, result, CompareTargetUnion::CreateRevision(revision))
    }

    /// Compare a key's mod revision.
    pub fn mod_revision(key: impl Into<Vec<u8>>, result: CompareResult, revision: i64) -> Self {
        Self::new(key, result, CompareTargetUnion::ModRevision(revision))
    }

    /// Compare a key's value.
    pub fn value(key: impl Into<Vec<u8>>, result: CompareResult, value: impl Into<Vec<u8>>) -> Self {
        Self::new(key, result, CompareTargetUnion::Value(value.into()))
    }

    /// Compare a key's lease.
    pub fn lease(key: impl Into<Vec<u8>>, result: CompareResult, lease: i64) -> Self {
        Self::new(key, result, CompareTargetUnion::Lease(lease))
    }

    /// Apply the compare to every key in `[key, range_end)`.
    pub fn with_range_end(mut self, range_end: impl Into<Vec<u8>>) -> Self {
        self.range_end = range_end.into();
        self
    }

    /// Evaluate this compare against a key-value record.
    ///
    /// A missing key compares as zero for numeric targets. A value compare
    /// against a missing key is always false.
    pub fn evaluate(&self, kv: Option<&KeyValue>) -> bool {
        match (&self.target, &self.target_union, kv) {
            (CompareTarget::Version, CompareTargetUnion::Version(expected), kv) => {
                compare_values(kv.map_or(0, |kv| kv.version), *expected, self.result)
            }
            (CompareTarget::Create, CompareTargetUnion::CreateRevision(expected), kv) => {
                compare_values(kv.map_or(0, |kv| kv.create_revision), *expected, self.result)
            }
            (CompareTarget::Mod, CompareTargetUnion::ModRevision(expected), kv) => {
                compare_values(kv.map_or(0, |kv| kv.mod_revision), *expected, self.result)
            }
            (CompareTarget::Value, CompareTargetUnion::Value(expected), Some(kv)) => {
                compare_bytes(&kv.value, expected, self.result)
            }
            (CompareTarget::Value, CompareTargetUnion::Value(_), None) => false,
            (CompareTarget::Lease, CompareTargetUnion::Lease(expected), kv) => {
                compare_values(kv.map_or(0, |kv| kv.lease), *expected, self.result)
            }

            // Mismatched target and union
            _ => false,
        }
    }
}

fn compare_values(actual: i64, expected: i64, result: CompareResult) -> bool {
    match result {
        CompareResult::Equal => actual == expected,
        CompareResult::NotEqual => actual != expected,
        CompareResult::Greater => actual > expected,
        CompareResult::Less => actual < expected,
    }
}

fn compare_bytes(actual: &[u8], expected: &[u8], result: CompareResult) -> bool {
    match result {
        CompareResult::Equal => actual == expected,
        CompareResult::NotEqual => actual != expected,
        CompareResult::Greater => actual > expected,
        CompareResult::Less => actual < expected,
    }
}

// ============================================================================
// Transaction Validation
// ============================================================================

/// Transaction validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnValidationError {
    /// Too many compares or operations in one branch.
    #[error("too many operations in txn request: {count} > {max}")]
    TooManyOperations { count: usize, max: usize },
    /// Nested transaction depth exceeded.
    #[error("nesting too deep: {depth} > {max}")]
    NestingTooDeep { depth: usize, max: usize },
    /// A branch writes the same key twice.
    #[error("duplicate key given in txn request")]
    DuplicateKey,
    /// Compare target and value kind disagree.
    #[error("invalid compare: {reason}")]
    InvalidCompare { reason: String },
}

impl From<TxnValidationError> for EtkvError {
    fn from(err: TxnValidationError) -> Self {
        EtkvError::invalid_argument(err.to_string())
    }
}

/// Transaction validation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnValidationConfig {
    /// Maximum number of compares, and of operations per branch.
    pub max_operations: usize,
    /// Maximum nesting depth for nested transactions.
    pub max_nesting_depth: usize,
}

impl Default for TxnValidationConfig {
    fn default() -> Self {
        Self {
            max_operations: 128,
            max_nesting_depth: 4,
        }
    }
}

impl TxnRequest {
    /// Validate the transaction structure.
    pub fn validate(&self, config: &TxnValidationConfig) -> Result<(), TxnValidationError> {
        self.validate_depth(config, 0)
    }

    fn validate_depth(
        &self,
        config: &TxnValidationConfig,
        depth: usize,
    ) -> Result<(), TxnValidationError> {
        if depth > config.max_nesting_depth {
            return Err(TxnValidationError::NestingTooDeep {
                depth,
                max: config.max_nesting_depth,
            });
        }

        for count in [self.compare.len(), self.success.len(), self.failure.len()] {
            if count > config.max_operations {
                return Err(TxnValidationError::TooManyOperations {
                    count,
                    max: config.max_operations,
                });
            }
        }

        for compare in &self.compare {
            if compare.target != compare.target_union.target() {
                return Err(TxnValidationError::InvalidCompare {
                    reason: format!("target {:?} does not match value kind", compare.target),
                });
            }
        }

        for op in self.success.iter().chain(&self.failure) {
            if let RequestOp::Txn(nested) = op {
                nested.validate_depth(config, depth + 1)?;
            }
        }

        branch_put_keys(&self.success)?;
        branch_put_keys(&self.failure)?;
        Ok(())
    }
}

/// Keys put by a branch. Fails if a branch puts one key twice or deletes a
/// key it also puts.
fn branch_put_keys(ops: &[RequestOp]) -> Result<BTreeSet<&[u8]>, TxnValidationError> {
    let mut puts: BTreeSet<&[u8]> = BTreeSet::new();
    for op in ops {
        match op {
            RequestOp::Put(req) => {
                if !puts.insert(req.key.as_slice()) {
                    return Err(TxnValidationError::DuplicateKey);
                }
            }
            RequestOp::Txn(nested) => {
                // Only one nested branch runs, so their puts may overlap.
                let mut nested_puts = branch_put_keys(&nested.success)?;
                nested_puts.extend(branch_put_keys(&nested.failure)?);
                for key in nested_puts {
                    if !puts.insert(key) {
                        return Err(TxnValidationError::DuplicateKey);
                    }
                }
            }
            RequestOp::Range(_) | RequestOp::DeleteRange(_) => {}
        }
    }
    for op in ops {
        if let RequestOp::DeleteRange(req) = op {
            if puts.iter().any(|k| in_range(k, &req.key, &req.range_end)) {
                return Err(TxnValidationError::DuplicateKey);
            }
        }
    }
    Ok(puts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_kv(value: &[u8], version: i64, mod_rev: i64, create_rev: i64) -> KeyValue {
        KeyValue {
            key: b"k".to_vec(),
            create_revision: create_rev,
            mod_revision: mod_rev,
            version,
            value: value.to_vec(),
            lease: 0,
        }
    }

    #[test]
    fn test_compare_against_present_key() {
        let kv = make_kv(b"v", 2, 5, 3);
        assert!(Compare::version("k", CompareResult::Equal, 2).evaluate(Some(&kv)));
        assert!(Compare::mod_revision("k", CompareResult::Greater, 4).evaluate(Some(&kv)));
        assert!(Compare::create_revision("k", CompareResult::Less, 4).evaluate(Some(&kv)));
        assert!(Compare::value("k", CompareResult::Equal, "v").evaluate(Some(&kv)));
        assert!(Compare::lease("k", CompareResult::Equal, 0).evaluate(Some(&kv)));
        assert!(!Compare::value("k", CompareResult::NotEqual, "v").evaluate(Some(&kv)));
    }

    #[test]
    fn test_compare_against_missing_key() {
        assert!(Compare::version("k", CompareResult::Equal, 0).evaluate(None));
        assert!(Compare::create_revision("k", CompareResult::Equal, 0).evaluate(None));
        assert!(!Compare::value("k", CompareResult::NotEqual, "x").evaluate(None));
        assert!(!Compare::value("k", CompareResult::Equal, "").evaluate(None));
    }

    #[test]
    fn test_mismatched_compare_is_rejected() {
        let mut compare = Compare::version("k", CompareResult::Equal, 1);
        compare.target = CompareTarget::Value;
        assert!(!compare.evaluate(None));
        let txn = TxnRequest {
            compare: vec![compare],
            ..TxnRequest::default()
        };
        assert!(matches!(
            txn.validate(&TxnValidationConfig::default()),
            Err(TxnValidationError::InvalidCompare { .. })
        ));
    }

    #[test]
    fn test_txn_validation_too_many_ops() {
        let config = TxnValidationConfig {
            max_operations: 2,
            ..Default::default()
        };

        let txn = TxnRequest {
            success: vec![
                RequestOp::Put(PutRequest::new("a", "")),
                RequestOp::Put(PutRequest::new("b", "")),
                RequestOp::Put(PutRequest::new("c", "")),
            ],
            ..TxnRequest::default()
        };

        assert_eq!(
            txn.validate(&config),
            Err(TxnValidationError::TooManyOperations { count: 3, max: 2 })
        );
        assert!(TxnRequest::default().validate(&config).is_ok());
    }

    #[test]
    fn test_txn_validation_duplicate_keys() {
        let config = TxnValidationConfig::default();
        let twice = TxnRequest {
            success: vec![
                RequestOp::Put(PutRequest::new("a", "1")),
                RequestOp::Put(PutRequest::new("a", "2")),
            ],
            ..TxnRequest::default()
        };
        assert_eq!(twice.validate(&config), Err(TxnValidationError::DuplicateKey));

        let put_and_delete = TxnRequest {
            failure: vec![
                RequestOp::Put(PutRequest::new("b", "1")),
                RequestOp::DeleteRange(DeleteRangeRequest::range("a", "c")),
            ],
            ..TxnRequest::default()
        };
        assert_eq!(
            put_and_delete.validate(&config),
            Err(TxnValidationError::DuplicateKey)
        );

        // Success and failure branches never both run.
        let across_branches = TxnRequest {
            success: vec![RequestOp::Put(PutRequest::new("a", "1"))],
            failure: vec![RequestOp::Put(PutRequest::new("a", "2"))],
            ..TxnRequest::default()
        };
        assert!(across_branches.validate(&config).is_ok());
    }

    #[test]
    fn test_txn_validation_nesting() {
        let config = TxnValidationConfig {
            max_nesting_depth: 1,
            ..Default::default()
        };
        let inner = TxnRequest {
            success: vec![RequestOp::Put(PutRequest::new("a", "1"))],
            failure: vec![RequestOp::Put(PutRequest::new("a", "2"))],
            ..TxnRequest::default()
        };
        let one = TxnRequest {
            success: vec![RequestOp::Txn(inner.clone())],
            ..TxnRequest::default()
        };
        assert!(one.validate(&config).is_ok());

        let two = TxnRequest {
            success: vec![RequestOp::Txn(one.clone())],
            ..TxnRequest::default()
        };
        assert_eq!(
            two.validate(&config),
            Err(TxnValidationError::NestingTooDeep { depth: 2, max: 1 })
        );

        let clash = TxnRequest {
            success: vec![
                RequestOp::Put(PutRequest::new("a", "0")),
                RequestOp::Txn(inner),
            ],
            ..TxnRequest::default()
        };
        assert_eq!(clash.validate(&config), Err(TxnValidationError::DuplicateKey));
    }

    #[test]
    fn test_stamp_headers_reaches_nested_responses() {
        let mut resp = TxnResponse {
            responses: vec![
                ResponseOp::Put(PutResponse::default()),
                ResponseOp::Txn(TxnResponse {
                    responses: vec![ResponseOp::Range(RangeResponse::default())],
                    ..TxnResponse::default()
                }),
            ],
            ..TxnResponse::default()
        };
        let header = ResponseHeader {
            cluster_id: 1,
            member_id: 2,
            revision: 9,
            raft_term: 3,
        };
        resp.stamp_headers(header);
        assert_eq!(resp.header, header);
        match &resp.responses[1] {
            ResponseOp::Txn(nested) => match &nested.responses[0] {
                ResponseOp::Range(r) => assert_eq!(r.header.revision, 9),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
