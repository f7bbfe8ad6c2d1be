//! Compactor.
//!
//! Compaction first persists the new watermark, which makes every read below
//! it fail at once, then walks the key index in batches and drops history
//! that no read at or above the watermark can reach.

use std::sync::Arc;

use crate::adapters::etcd::kv::{CompactionRequest, CompactionResponse};
use crate::backend::{Backend, SnapshotTxn, TxnKv};
use crate::core::error::{EtkvError, EtkvResult};

use super::index::{decode, encode, KeyIndex};
use super::keys;
use super::store::RevisionIndex;
use super::writer::store_state;

/// Outcome of one physical compaction batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub keys_scanned: usize,
    pub revisions_removed: usize,
    pub keys_removed: usize,
}

/// Reclaims history below a revision watermark.
pub struct Compactor<B: Backend> {
    index: Arc<RevisionIndex<B>>,
    batch_size: usize,
}

impl<B: Backend> Compactor<B> {
    pub fn new(index: Arc<RevisionIndex<B>>, batch_size: usize) -> Self {
        Self {
            index,
            batch_size: batch_size.max(1),
        }
    }

    /// Compact all history below `req.revision`.
    ///
    /// Physical reclamation always finishes before this returns, so the
    /// `physical` flag needs no separate handling.
    pub async fn compact(&self, req: &CompactionRequest) -> EtkvResult<CompactionResponse> {
        let revision = req.revision;
        let retry = self.index.retry_policy();
        let current = retry
            .run("compact", || async move { self.advance_watermark(revision).await })
            .await?;

        let mut cursor = keys::index_range(b"", b"\0").0;
        let mut total = BatchStats::default();
        loop {
            let start = &cursor;
            let (stats, next) = retry
                .run("compact_batch", || async move {
                    self.compact_batch(start, revision).await
                })
                .await?;
            total.keys_scanned += stats.keys_scanned;
            total.revisions_removed += stats.revisions_removed;
            total.keys_removed += stats.keys_removed;
            match next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        tracing::info!(
            revision,
            keys_scanned = total.keys_scanned,
            revisions_removed = total.revisions_removed,
            keys_removed = total.keys_removed,
            "compaction complete"
        );

        let mut resp = CompactionResponse::default();
        resp.header.revision = current;
        Ok(resp)
    }

    /// Persist the watermark. Returns the current revision.
    async fn advance_watermark(&self, revision: i64) -> EtkvResult<i64> {
        let floor = self.index.floor();
        let mut txn = self.index.backend().begin().await?;
        let writer = self.index.open_writer(&mut txn, floor).await?;
        let mut state = writer.state();
        drop(writer);

        if revision > state.current {
            return Err(EtkvError::invalid_argument(format!(
                "compaction revision {} is beyond current revision {}",
                revision, state.current
            )));
        }
        if revision < state.compacted {
            return Err(EtkvError::invalid_argument(format!(
                "compaction revision {} is below watermark {}",
                revision, state.compacted
            )));
        }

        if revision > state.compacted {
            state.compacted = revision;
            store_state(&mut txn, &state).await?;
            txn.commit().await?;
            tracing::debug!(revision, "compaction watermark advanced");
        }
        self.index.settle(state.current, None)
    }

    /// Compact up to `batch_size` key indexes starting at `start`. Returns
    /// where the next batch starts, or `None` once the index is exhausted.
    async fn compact_batch(
        &self,
        start: &[u8],
        revision: i64,
    ) -> EtkvResult<(BatchStats, Option<Vec<u8>>)> {
        let end = keys::index_range(b"", b"\0").1;
        let mut txn = self.index.backend().begin().await?;
        let batch = txn.scan(start, &end, self.batch_size).await?;

        let mut stats = BatchStats {
            keys_scanned: batch.len(),
            ..BatchStats::default()
        };
        for (index_key, bytes) in &batch {
            let mut index: KeyIndex = decode(bytes)?;
            let removed = index.compact(revision);
            if removed.is_empty() {
                continue;
            }
            // Tombstones have no entry of their own; deleting is harmless.
            for rev in &removed {
                txn.delete(&keys::rev_key(*rev)).await?;
            }
            stats.revisions_removed += removed.len();
            if index.is_empty() {
                txn.delete(index_key).await?;
                stats.keys_removed += 1;
            } else {
                txn.set(index_key, &encode(&index)?).await?;
            }
        }
        if stats.revisions_removed > 0 {
            txn.commit().await?;
        }

        let next = match batch.last() {
            Some((last, _)) if batch.len() == self.batch_size => Some(keys::key_after(last)),
            _ => None,
        };
        Ok((stats, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::etcd::kv::{DeleteRangeRequest, PutRequest};
    use crate::backend::MemoryBackend;
    use crate::mvcc::retry::RetryPolicy;

    fn setup(batch: usize) -> (Arc<MemoryBackend>, Arc<RevisionIndex<MemoryBackend>>, Compactor<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let index = Arc::new(RevisionIndex::new(backend.clone(), RetryPolicy::default()));
        let compactor = Compactor::new(index.clone(), batch);
        (backend, index, compactor)
    }

    fn at(revision: i64) -> CompactionRequest {
        CompactionRequest {
            revision,
            physical: true,
        }
    }

    #[tokio::test]
    async fn superseded_history_is_dropped() {
        let (backend, index, compactor) = setup(2);
        index.put(&PutRequest::new("x", "1")).await.unwrap(); // 2
        index.put(&PutRequest::new("x", "2")).await.unwrap(); // 3
        index.put(&PutRequest::new("y", "1")).await.unwrap(); // 4
        index.put(&PutRequest::new("x", "3")).await.unwrap(); // 5
        let before = backend.len();

        let resp = compactor.compact(&at(4)).await.unwrap();
        assert_eq!(resp.header.revision, 5);
        assert!(backend.len() < before);

        assert!(matches!(
            index.get(b"x", 2).await,
            Err(EtkvError::RevisionCompacted { .. })
        ));
        assert_eq!(index.get(b"x", 4).await.unwrap().unwrap().value, b"2".to_vec());
        assert_eq!(index.get(b"y", 4).await.unwrap().unwrap().value, b"1".to_vec());
        assert_eq!(index.get(b"x", 0).await.unwrap().unwrap().value, b"3".to_vec());
        assert_eq!(index.state().await.unwrap().compacted, 4);
    }

    #[tokio::test]
    async fn deleted_keys_vanish_entirely() {
        let (backend, index, compactor) = setup(100);
        index.put(&PutRequest::new("gone", "1")).await.unwrap(); // 2
        index.delete_range(&DeleteRangeRequest::key("gone")).await.unwrap(); // 3
        index.put(&PutRequest::new("kept", "1")).await.unwrap(); // 4

        compactor.compact(&at(4)).await.unwrap();
        let index_key = keys::index_key(b"gone");
        assert!(!backend.keys().contains(&index_key));
        assert!(index.get(b"gone", 0).await.unwrap().is_none());
        assert!(index.get(b"kept", 4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn watermark_bounds_are_enforced() {
        let (_, index, compactor) = setup(10);
        index.put(&PutRequest::new("k", "1")).await.unwrap();
        index.put(&PutRequest::new("k", "2")).await.unwrap();

        assert!(matches!(
            compactor.compact(&at(9)).await,
            Err(EtkvError::InvalidArgument { .. })
        ));
        compactor.compact(&at(3)).await.unwrap();
        // Same watermark again is a no-op.
        compactor.compact(&at(3)).await.unwrap();
        assert!(matches!(
            compactor.compact(&at(2)).await,
            Err(EtkvError::InvalidArgument { .. })
        ));
        assert_eq!(index.current_revision().await.unwrap(), 3);
    }
}
