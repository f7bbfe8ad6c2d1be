//! Revision Index.
//!
//! Owns the global revision counter and the `(key, revision) -> value`
//! mapping. Every mutation runs inside one backend transaction opened here,
//! retried under the configured [`RetryPolicy`] when the backend reports a
//! conflict.

use std::sync::Arc;

use crate::adapters::etcd::kv::{
    DeleteRangeRequest, DeleteRangeResponse, PutRequest, PutResponse, RangeRequest, RangeResponse,
};
use crate::backend::{Backend, SnapshotTxn, TxnKv};
use crate::core::error::EtkvResult;

use super::index::{decode, KeyValue};
use super::keys;
use super::retry::RetryPolicy;
use super::revision::{RevisionState, RevisionTracker};
use super::writer::MvccWriter;

/// Multi-version view over a transactional backend.
pub struct RevisionIndex<B: Backend> {
    backend: Arc<B>,
    tracker: RevisionTracker,
    retry: RetryPolicy,
}

impl<B: Backend> RevisionIndex<B> {
    /// Create an index over `backend`.
    pub fn new(backend: Arc<B>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            tracker: RevisionTracker::new(),
            retry,
        }
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Retry budget for mutations.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Persisted revision counters, read with a single atomic get.
    pub async fn state(&self) -> EtkvResult<RevisionState> {
        let state = match self.backend.get(&keys::meta_revision_key()).await? {
            Some(bytes) => decode(&bytes)?,
            None => RevisionState::default(),
        };
        self.tracker.observe(state.current);
        Ok(state)
    }

    /// Latest committed revision.
    pub async fn current_revision(&self) -> EtkvResult<i64> {
        Ok(self.state().await?.current)
    }

    /// Sample the regression floor. Must be called before `begin`.
    pub(crate) fn floor(&self) -> i64 {
        self.tracker.observed()
    }

    /// Open MVCC state on a transaction begun after `floor` was sampled.
    pub(crate) async fn open_writer<'t>(
        &self,
        txn: &'t mut B::Txn,
        floor: i64,
    ) -> EtkvResult<MvccWriter<'t, B::Txn>> {
        let writer = MvccWriter::open(txn).await?;
        self.tracker.check_base(floor, writer.state().current)?;
        Ok(writer)
    }

    /// Record the outcome of a transaction that started at `base`.
    /// Returns the store revision after it.
    pub(crate) fn settle(&self, base: i64, committed: Option<i64>) -> EtkvResult<i64> {
        match committed {
            Some(revision) => {
                self.tracker.record_commit(base, revision)?;
                Ok(revision)
            }
            None => {
                self.tracker.observe(base);
                Ok(base)
            }
        }
    }

    /// Range over keys at a revision.
    pub async fn range(&self, req: &RangeRequest) -> EtkvResult<RangeResponse> {
        let floor = self.floor();
        let mut txn = self.backend.begin().await?;
        let mut writer = self.open_writer(&mut txn, floor).await?;
        let base = writer.state().current;
        let mut resp = writer.range(req).await?;
        resp.header.revision = self.settle(base, None)?;
        Ok(resp)
    }

    /// Read one key. `revision` of 0 reads the latest value.
    pub async fn get(&self, key: &[u8], revision: i64) -> EtkvResult<Option<KeyValue>> {
        let floor = self.floor();
        let mut txn = self.backend.begin().await?;
        let mut writer = self.open_writer(&mut txn, floor).await?;
        let kv = writer.get(key, revision).await?;
        Ok(kv)
    }

    /// Write a key under a new revision.
    pub async fn put(&self, req: &PutRequest) -> EtkvResult<PutResponse> {
        self.retry
            .run("put", || async move { self.try_put(req).await })
            .await
    }

    async fn try_put(&self, req: &PutRequest) -> EtkvResult<PutResponse> {
        let floor = self.floor();
        let mut txn = self.backend.begin().await?;
        let mut writer = self.open_writer(&mut txn, floor).await?;
        let base = writer.state().current;
        let mut resp = writer.put(req).await?;
        let committed = writer.finish().await?;
        txn.commit().await?;
        resp.header.revision = self.settle(base, committed)?;
        tracing::debug!(revision = resp.header.revision, "put committed");
        Ok(resp)
    }

    /// Delete every live key in a range under one new revision. Deleting
    /// nothing leaves the revision unchanged.
    pub async fn delete_range(&self, req: &DeleteRangeRequest) -> EtkvResult<DeleteRangeResponse> {
        self.retry
            .run("delete_range", || async move { self.try_delete_range(req).await })
            .await
    }

    async fn try_delete_range(&self, req: &DeleteRangeRequest) -> EtkvResult<DeleteRangeResponse> {
        let floor = self.floor();
        let mut txn = self.backend.begin().await?;
        let mut writer = self.open_writer(&mut txn, floor).await?;
        let base = writer.state().current;
        let mut resp = writer.delete_range(req).await?;
        let committed = writer.finish().await?;
        if committed.is_some() {
            txn.commit().await?;
        }
        resp.header.revision = self.settle(base, committed)?;
        tracing::debug!(
            revision = resp.header.revision,
            deleted = resp.deleted,
            "delete_range committed"
        );
        Ok(resp)
    }
}
