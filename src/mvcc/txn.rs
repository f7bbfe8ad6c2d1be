//! Transaction Translator.
//!
//! Compiles an etcd Compare/Then/Else request into one backend snapshot
//! transaction. Compares read the snapshot (plus any earlier writes of the
//! same request for nested transactions), and every write in the chosen
//! branch is stamped with the same main revision.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::adapters::etcd::kv::{RangeRequest, ResponseHeader};
use crate::adapters::etcd::txn::{
    Compare, RequestOp, ResponseOp, TxnRequest, TxnResponse, TxnValidationConfig,
};
use crate::backend::{Backend, SnapshotTxn, TxnKv};
use crate::core::error::EtkvResult;

use super::store::RevisionIndex;
use super::writer::MvccWriter;

type ApplyFuture<'a> = Pin<Box<dyn Future<Output = EtkvResult<TxnResponse>> + Send + 'a>>;

/// Executes transactions against a [`RevisionIndex`].
pub struct TxnTranslator<B: Backend> {
    index: Arc<RevisionIndex<B>>,
    limits: TxnValidationConfig,
}

impl<B: Backend> TxnTranslator<B> {
    pub fn new(index: Arc<RevisionIndex<B>>, limits: TxnValidationConfig) -> Self {
        Self { index, limits }
    }

    /// Validate, then run the transaction with bounded conflict retries.
    pub async fn execute(&self, req: &TxnRequest) -> EtkvResult<TxnResponse> {
        req.validate(&self.limits)?;
        self.index
            .retry_policy()
            .run("txn", || async move { self.try_execute(req).await })
            .await
    }

    async fn try_execute(&self, req: &TxnRequest) -> EtkvResult<TxnResponse> {
        let floor = self.index.floor();
        let mut txn = self.index.backend().begin().await?;
        let mut writer = self.index.open_writer(&mut txn, floor).await?;
        let base = writer.state().current;

        let mut resp = apply(&mut writer, req).await?;
        let committed = writer.finish().await?;
        if committed.is_some() {
            txn.commit().await?;
        }

        let revision = self.index.settle(base, committed)?;
        resp.stamp_headers(ResponseHeader {
            revision,
            ..ResponseHeader::default()
        });
        tracing::debug!(
            revision,
            succeeded = resp.succeeded,
            ops = resp.responses.len(),
            "txn executed"
        );
        Ok(resp)
    }
}

/// Evaluate the compares and apply the selected branch.
fn apply<'a, 't, T>(writer: &'a mut MvccWriter<'t, T>, req: &'a TxnRequest) -> ApplyFuture<'a>
where
    't: 'a,
    T: SnapshotTxn + 'a,
{
    Box::pin(async move {
        let mut succeeded = true;
        for compare in &req.compare {
            if !holds(writer, compare).await? {
                succeeded = false;
                break;
            }
        }

        let ops = if succeeded { &req.success } else { &req.failure };
        let mut responses = Vec::with_capacity(ops.len());
        for op in ops {
            let resp = match op {
                RequestOp::Range(r) => ResponseOp::Range(writer.range(r).await?),
                RequestOp::Put(r) => ResponseOp::Put(writer.put(r).await?),
                RequestOp::DeleteRange(r) => ResponseOp::DeleteRange(writer.delete_range(r).await?),
                RequestOp::Txn(nested) => ResponseOp::Txn(apply(&mut *writer, nested).await?),
            };
            responses.push(resp);
        }

        Ok(TxnResponse {
            succeeded,
            responses,
            ..TxnResponse::default()
        })
    })
}

/// A range compare must hold for every live key in the range. An empty
/// range compares like a single missing key.
async fn holds<T: SnapshotTxn>(writer: &mut MvccWriter<'_, T>, compare: &Compare) -> EtkvResult<bool> {
    if compare.range_end.is_empty() {
        let kv = writer.get(&compare.key, 0).await?;
        return Ok(compare.evaluate(kv.as_ref()));
    }
    let found = writer
        .range(&RangeRequest::range(compare.key.clone(), compare.range_end.clone()))
        .await?;
    if found.kvs.is_empty() {
        return Ok(compare.evaluate(None));
    }
    Ok(found.kvs.iter().all(|kv| compare.evaluate(Some(kv))))
}
