//! Response envelope.
//!
//! Every etcd response carries `{cluster_id, member_id, revision, raft_term}`.
//! KV operations report the revision their transaction observed or committed;
//! lease operations and error paths read the current revision with a single
//! atomic get.

use super::kv::{CompactionResponse, DeleteRangeResponse, PutResponse, RangeResponse, ResponseHeader};
use super::lease::{
    LeaseGrantResponse, LeaseKeepAliveResponse, LeaseLeasesResponse, LeaseRevokeResponse,
    LeaseTimeToLiveResponse,
};
use super::txn::TxnResponse;
use crate::backend::Backend;
use crate::mvcc::RevisionIndex;

/// Builds response headers for one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBuilder {
    cluster_id: u64,
    member_id: u64,
    raft_term: u64,
}

impl HeaderBuilder {
    pub fn new(cluster_id: u64, member_id: u64, raft_term: u64) -> Self {
        Self {
            cluster_id,
            member_id,
            raft_term,
        }
    }

    /// Header at a known revision.
    pub fn at(&self, revision: i64) -> ResponseHeader {
        ResponseHeader {
            cluster_id: self.cluster_id,
            member_id: self.member_id,
            revision,
            raft_term: self.raft_term,
        }
    }

    /// Header at the current revision. Falls back to revision 0 if the
    /// backend cannot be read.
    pub async fn current<B: Backend>(&self, index: &RevisionIndex<B>) -> ResponseHeader {
        match index.current_revision().await {
            Ok(revision) => self.at(revision),
            Err(err) => {
                tracing::debug!(error = %err, "header revision unavailable");
                self.at(0)
            }
        }
    }
}

/// A response that carries an envelope.
pub trait Envelope {
    fn header_mut(&mut self) -> &mut ResponseHeader;

    fn set_header(&mut self, header: ResponseHeader) {
        *self.header_mut() = header;
    }
}

macro_rules! impl_envelope {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Envelope for $ty {
                fn header_mut(&mut self) -> &mut ResponseHeader {
                    &mut self.header
                }
            }
        )*
    };
}

impl_envelope!(
    RangeResponse,
    PutResponse,
    DeleteRangeResponse,
    CompactionResponse,
    LeaseGrantResponse,
    LeaseRevokeResponse,
    LeaseKeepAliveResponse,
    LeaseTimeToLiveResponse,
    LeaseLeasesResponse,
);

impl Envelope for TxnResponse {
    fn header_mut(&mut self) -> &mut ResponseHeader {
        &mut self.header
    }

    fn set_header(&mut self, header: ResponseHeader) {
        self.stamp_headers(header);
    }
}
