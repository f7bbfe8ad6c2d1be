//! Transactional MVCC read/write path.
//!
//! An [`MvccWriter`] wraps one open backend transaction. It reads the
//! persisted [`RevisionState`] once, and every mutation made through it is
//! stamped `(current + 1, sub)` with `sub` counting up from zero, so a whole
//! transaction commits under a single main revision. [`MvccWriter::finish`]
//! persists the advanced counter only if something was written.

use std::cmp::Ordering;

use crate::adapters::etcd::kv::{
    DeleteRangeRequest, DeleteRangeResponse, PutRequest, PutResponse, RangeRequest,
    RangeResponse, SortOrder, SortTarget,
};
use crate::backend::SnapshotTxn;
use crate::core::error::{EtkvError, EtkvResult};
use crate::lease::table;

use super::index::{decode, encode, EntryFlags, IndexEntry, KeyIndex, KeyRecord, KeyValue, MvccEntry};
use super::keys;
use super::revision::{Revision, RevisionState};

/// Read the persisted revision counters.
pub async fn load_state<T: SnapshotTxn>(txn: &mut T) -> EtkvResult<RevisionState> {
    match txn.get(&keys::meta_revision_key()).await? {
        Some(bytes) => decode(&bytes),
        None => Ok(RevisionState::default()),
    }
}

/// Write the revision counters.
pub async fn store_state<T: SnapshotTxn>(txn: &mut T, state: &RevisionState) -> EtkvResult<()> {
    txn.set(&keys::meta_revision_key(), &encode(state)?).await?;
    Ok(())
}

/// MVCC operations inside one backend transaction.
pub struct MvccWriter<'t, T: SnapshotTxn> {
    txn: &'t mut T,
    state: RevisionState,
    main: i64,
    sub: i64,
}

impl<'t, T: SnapshotTxn> MvccWriter<'t, T> {
    /// Start MVCC work on an open transaction.
    pub async fn open(txn: &'t mut T) -> EtkvResult<Self> {
        let state = load_state(txn).await?;
        Ok(Self {
            txn,
            state,
            main: state.current + 1,
            sub: 0,
        })
    }

    /// Revision counters as of the transaction snapshot.
    pub fn state(&self) -> RevisionState {
        self.state
    }

    /// Whether any mutation has been made.
    pub fn has_writes(&self) -> bool {
        self.sub > 0
    }

    /// Revision the store will be at once this transaction commits.
    pub fn revision(&self) -> i64 {
        if self.has_writes() {
            self.main
        } else {
            self.state.current
        }
    }

    /// Underlying backend transaction.
    pub fn txn(&mut self) -> &mut T {
        self.txn
    }

    fn next_revision(&mut self) -> Revision {
        let revision = Revision::new(self.main, self.sub);
        self.sub += 1;
        revision
    }

    /// Resolve a requested read revision. Zero reads the latest state,
    /// including this transaction's own writes.
    fn read_at(&self, revision: i64) -> EtkvResult<i64> {
        if revision <= 0 {
            Ok(i64::MAX)
        } else {
            self.state.resolve_read(revision)
        }
    }

    async fn load_index(&mut self, key: &[u8]) -> EtkvResult<Option<KeyIndex>> {
        match self.txn.get(&keys::index_key(key)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn store_index(&mut self, key: &[u8], index: &KeyIndex) -> EtkvResult<()> {
        self.txn.set(&keys::index_key(key), &encode(index)?).await?;
        Ok(())
    }

    async fn load_entry(&mut self, revision: Revision) -> EtkvResult<MvccEntry> {
        match self.txn.get(&keys::rev_key(revision)).await? {
            Some(bytes) => decode(&bytes),
            None => Err(EtkvError::internal(format!(
                "index references missing entry at {}",
                revision
            ))),
        }
    }

    async fn latest_entry(&mut self, index: &KeyIndex) -> EtkvResult<Option<MvccEntry>> {
        if index.current.is_none() {
            return Ok(None);
        }
        match index.entries.last() {
            Some(last) => Ok(Some(self.load_entry(last.revision).await?)),
            None => Err(EtkvError::internal("live key has no index entries")),
        }
    }

    /// Read one key. `revision` of 0 reads the latest value.
    pub async fn get(&mut self, key: &[u8], revision: i64) -> EtkvResult<Option<KeyValue>> {
        let at = self.read_at(revision)?;
        let Some(index) = self.load_index(key).await? else {
            return Ok(None);
        };
        match index.visible_at(at) {
            Some(rev) => Ok(Some(self.load_entry(rev).await?.to_key_value())),
            None => Ok(None),
        }
    }

    /// Evaluate a range request.
    pub async fn range(&mut self, req: &RangeRequest) -> EtkvResult<RangeResponse> {
        require_key(&req.key)?;
        let at = self.read_at(req.revision)?;
        let (start, end) = keys::index_range(&req.key, &req.range_end);
        let indexes = self.txn.scan(&start, &end, 0).await?;

        // `count` covers every live key in range, before revision filters
        // and `limit`, as etcd reports it.
        let mut count = 0;
        let mut kvs = Vec::new();
        for (_, bytes) in indexes {
            let index: KeyIndex = decode(&bytes)?;
            let Some(rev) = index.visible_at(at) else {
                continue;
            };
            count += 1;
            let kv = self.load_entry(rev).await?.to_key_value();
            if req.accepts(&kv) {
                kvs.push(kv);
            }
        }

        sort_kvs(&mut kvs, req.sort_order, req.sort_target);

        let mut more = false;
        if req.limit > 0 && kvs.len() > req.limit as usize {
            kvs.truncate(req.limit as usize);
            more = true;
        }
        if req.count_only {
            kvs.clear();
        } else if req.keys_only {
            for kv in &mut kvs {
                kv.value.clear();
            }
        }

        Ok(RangeResponse {
            kvs,
            more,
            count,
            ..RangeResponse::default()
        })
    }

    /// Write a key.
    pub async fn put(&mut self, req: &PutRequest) -> EtkvResult<PutResponse> {
        require_key(&req.key)?;
        if req.ignore_value && !req.value.is_empty() {
            return Err(EtkvError::invalid_argument("value is provided"));
        }
        if req.ignore_lease && req.lease != 0 {
            return Err(EtkvError::invalid_argument("lease is provided"));
        }

        let mut index = self.load_index(&req.key).await?.unwrap_or_default();
        let prev = self.latest_entry(&index).await?;
        if (req.ignore_value || req.ignore_lease) && prev.is_none() {
            return Err(EtkvError::KeyNotFound);
        }

        let prev_lease = prev.as_ref().map_or(0, |p| p.record.lease_id);
        let value = match (&prev, req.ignore_value) {
            (Some(p), true) => p.value.clone(),
            _ => req.value.clone(),
        };
        let lease_id = if req.ignore_lease { prev_lease } else { req.lease };

        if lease_id != 0 {
            table::attach(&mut *self.txn, lease_id, &req.key).await?;
        }
        if prev_lease != 0 && prev_lease != lease_id {
            table::detach(&mut *self.txn, prev_lease, &req.key).await?;
        }

        let revision = self.next_revision();
        let record = KeyRecord {
            create_revision: prev
                .as_ref()
                .map_or(revision.main, |p| p.record.create_revision),
            mod_revision: revision.main,
            version: prev.as_ref().map_or(1, |p| p.record.version + 1),
            lease_id,
        };
        let entry = MvccEntry {
            key: req.key.clone(),
            value,
            record,
        };
        self.txn
            .set(&keys::rev_key(revision), &encode(&entry)?)
            .await?;
        index.push(IndexEntry {
            revision,
            flags: EntryFlags::empty(),
        });
        index.current = Some(record);
        self.store_index(&req.key, &index).await?;

        tracing::trace!(%revision, version = record.version, lease_id, "put");
        Ok(PutResponse {
            prev_kv: prev.filter(|_| req.prev_kv).map(|p| p.to_key_value()),
            ..PutResponse::default()
        })
    }

    /// Tombstone a live key and detach it from its lease.
    async fn tombstone(&mut self, key: &[u8], mut index: KeyIndex) -> EtkvResult<Option<KeyValue>> {
        let Some(prev) = self.latest_entry(&index).await? else {
            return Ok(None);
        };
        if prev.record.lease_id != 0 {
            table::detach(&mut *self.txn, prev.record.lease_id, key).await?;
        }
        let revision = self.next_revision();
        index.push(IndexEntry {
            revision,
            flags: EntryFlags::TOMBSTONE,
        });
        index.current = None;
        self.store_index(key, &index).await?;
        tracing::trace!(%revision, "delete");
        Ok(Some(prev.to_key_value()))
    }

    /// Delete every live key in a range.
    pub async fn delete_range(&mut self, req: &DeleteRangeRequest) -> EtkvResult<DeleteRangeResponse> {
        require_key(&req.key)?;
        let (start, end) = keys::index_range(&req.key, &req.range_end);
        let indexes = self.txn.scan(&start, &end, 0).await?;

        let mut deleted = 0;
        let mut prev_kvs = Vec::new();
        for (index_key, bytes) in indexes {
            let index: KeyIndex = decode(&bytes)?;
            if index.current.is_none() {
                continue;
            }
            let Some(user_key) = keys::user_key_of(&index_key) else {
                continue;
            };
            if let Some(prev) = self.tombstone(user_key, index).await? {
                deleted += 1;
                if req.prev_kv {
                    prev_kvs.push(prev);
                }
            }
        }

        Ok(DeleteRangeResponse {
            deleted,
            prev_kvs,
            ..DeleteRangeResponse::default()
        })
    }

    /// Delete `key` if it is live and still attached to `lease_id`.
    pub async fn delete_leased(&mut self, key: &[u8], lease_id: i64) -> EtkvResult<bool> {
        let Some(index) = self.load_index(key).await? else {
            return Ok(false);
        };
        match index.current {
            Some(record) if record.lease_id == lease_id => {
                Ok(self.tombstone(key, index).await?.is_some())
            }
            _ => Ok(false),
        }
    }

    /// Persist the advanced revision counter if anything was written.
    ///
    /// Returns the main revision the transaction will commit at, or `None`
    /// for a read-only transaction.
    pub async fn finish(self) -> EtkvResult<Option<i64>> {
        if !self.has_writes() {
            return Ok(None);
        }
        let state = RevisionState {
            current: self.main,
            compacted: self.state.compacted,
        };
        store_state(self.txn, &state).await?;
        Ok(Some(self.main))
    }
}

fn require_key(key: &[u8]) -> EtkvResult<()> {
    if key.is_empty() {
        return Err(EtkvError::invalid_argument("key is not provided"));
    }
    Ok(())
}

fn sort_kvs(kvs: &mut [KeyValue], order: SortOrder, target: SortTarget) {
    let order = match (order, target) {
        (SortOrder::None, SortTarget::Key) => return,
        (SortOrder::None, _) => SortOrder::Ascend,
        (order, _) => order,
    };
    let cmp = |a: &KeyValue, b: &KeyValue| -> Ordering {
        match target {
            SortTarget::Key => a.key.cmp(&b.key),
            SortTarget::Version => a.version.cmp(&b.version),
            SortTarget::Create => a.create_revision.cmp(&b.create_revision),
            SortTarget::Mod => a.mod_revision.cmp(&b.mod_revision),
            SortTarget::Value => a.value.cmp(&b.value),
        }
    };
    match order {
        SortOrder::Descend => kvs.sort_by(|a, b| cmp(b, a)),
        _ => kvs.sort_by(cmp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, TxnKv};
    use crate::core::time::Tick;
    use crate::lease::record::LeaseRecord;

    async fn commit_put(backend: &MemoryBackend, key: &str, value: &str) -> i64 {
        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        writer.put(&PutRequest::new(key, value)).await.unwrap();
        let rev = writer.finish().await.unwrap().unwrap();
        txn.commit().await.unwrap();
        rev
    }

    #[tokio::test]
    async fn writes_in_one_txn_share_main_revision() {
        let backend = MemoryBackend::new();
        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        assert_eq!(writer.revision(), 1);
        writer.put(&PutRequest::new("a", "1")).await.unwrap();
        writer.put(&PutRequest::new("b", "1")).await.unwrap();
        assert_eq!(writer.revision(), 2);

        // Reads see the transaction's own writes.
        let a = writer.get(b"a", 0).await.unwrap().unwrap();
        assert_eq!(a.mod_revision, 2);
        assert_eq!(writer.finish().await.unwrap(), Some(2));
        txn.commit().await.unwrap();

        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        let b = writer.get(b"b", 0).await.unwrap().unwrap();
        assert_eq!((b.create_revision, b.mod_revision, b.version), (2, 2, 1));
        assert_eq!(writer.finish().await.unwrap(), None);
    }

    #[tokio::test]
    async fn historical_reads_and_tombstones() {
        let backend = MemoryBackend::new();
        assert_eq!(commit_put(&backend, "x", "1").await, 2);
        assert_eq!(commit_put(&backend, "x", "2").await, 3);

        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        let resp = writer
            .delete_range(&DeleteRangeRequest {
                prev_kv: true,
                ..DeleteRangeRequest::key("x")
            })
            .await
            .unwrap();
        assert_eq!(resp.deleted, 1);
        assert_eq!(resp.prev_kvs[0].value, b"2".to_vec());
        assert_eq!(writer.finish().await.unwrap(), Some(4));
        txn.commit().await.unwrap();

        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        assert!(writer.get(b"x", 0).await.unwrap().is_none());
        assert_eq!(writer.get(b"x", 2).await.unwrap().unwrap().value, b"1".to_vec());
        assert_eq!(writer.get(b"x", 3).await.unwrap().unwrap().version, 2);
        assert!(writer.get(b"x", 4).await.unwrap().is_none());
        assert!(matches!(
            writer.get(b"x", 5).await,
            Err(EtkvError::FutureRevision { .. })
        ));
    }

    #[tokio::test]
    async fn recreate_resets_version_and_create_revision() {
        let backend = MemoryBackend::new();
        commit_put(&backend, "k", "1").await;
        commit_put(&backend, "k", "2").await;
        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        writer.delete_range(&DeleteRangeRequest::key("k")).await.unwrap();
        writer.finish().await.unwrap();
        txn.commit().await.unwrap();
        let rev = commit_put(&backend, "k", "3").await;

        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        let kv = writer.get(b"k", 0).await.unwrap().unwrap();
        assert_eq!((kv.create_revision, kv.mod_revision, kv.version), (rev, rev, 1));
    }

    #[tokio::test]
    async fn ignore_flags_require_existing_key() {
        let backend = MemoryBackend::new();
        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        let req = PutRequest {
            ignore_value: true,
            ..PutRequest::new("missing", "")
        };
        assert!(matches!(writer.put(&req).await, Err(EtkvError::KeyNotFound)));

        let req = PutRequest {
            ignore_value: true,
            ..PutRequest::new("k", "v")
        };
        assert!(matches!(
            writer.put(&req).await,
            Err(EtkvError::InvalidArgument { .. })
        ));

        writer.put(&PutRequest::new("k", "v")).await.unwrap();
        let keep_value = PutRequest {
            ignore_value: true,
            ..PutRequest::new("k", "")
        };
        writer.put(&keep_value).await.unwrap();
        let kv = writer.get(b"k", 0).await.unwrap().unwrap();
        assert_eq!(kv.value, b"v".to_vec());
        assert_eq!(kv.version, 2);
    }

    #[tokio::test]
    async fn lease_attachment_moves_with_puts() {
        let backend = MemoryBackend::new();
        let mut txn = backend.begin().await.unwrap();
        table::save(&mut txn, &LeaseRecord::new(1, 10, Tick::zero()))
            .await
            .unwrap();
        table::save(&mut txn, &LeaseRecord::new(2, 10, Tick::zero()))
            .await
            .unwrap();

        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        assert!(matches!(
            writer.put(&PutRequest::new("k", "v").with_lease(3)).await,
            Err(EtkvError::LeaseNotFound { lease_id: 3 })
        ));
        writer.put(&PutRequest::new("k", "v").with_lease(1)).await.unwrap();
        writer.put(&PutRequest::new("k", "v").with_lease(2)).await.unwrap();
        writer.finish().await.unwrap();

        let one = table::load(&mut txn, 1).await.unwrap().unwrap();
        let two = table::load(&mut txn, 2).await.unwrap().unwrap();
        assert!(one.attached_keys.is_empty());
        assert!(two.attached_keys.contains(&b"k".to_vec()));

        let mut writer = MvccWriter::open(&mut txn).await.unwrap();
        assert!(!writer.delete_leased(b"k", 1).await.unwrap());
        assert!(writer.delete_leased(b"k", 2).await.unwrap());
        writer.finish().await.unwrap();
        let two = table::load(&mut txn, 2).await.unwrap().unwrap();
        assert!(two.attached_keys.is_empty());
    }

    #[tokio::test]
    async fn range_limit_sort_and_projection() {
        let backend = MemoryBackend::new();
        commit_put(&backend, "a", "3").await;
        commit_put(&backend, "b", "1").await;
        commit_put(&backend, "c", "2").await;
        commit_put(&backend, "d", "0").await;

        let mut txn = backend.begin().await.unwrap();
        let mut writer = MvccWriter::open(&mut txn).await.unwrap();

        let resp = writer
            .range(&RangeRequest::range("a", "d").with_limit(2))
            .await
            .unwrap();
        assert_eq!(resp.count, 3);
        assert!(resp.more);
        let keys: Vec<_> = resp.kvs.iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        let resp = writer
            .range(&RangeRequest {
                sort_order: SortOrder::Descend,
                sort_target: SortTarget::Value,
                keys_only: true,
                ..RangeRequest::range("a", "\0")
            })
            .await
            .unwrap();
        let keys: Vec<_> = resp.kvs.iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"b".to_vec(), b"d".to_vec()]);
        assert!(resp.kvs.iter().all(|kv| kv.value.is_empty()));

        let resp = writer
            .range(&RangeRequest {
                count_only: true,
                ..RangeRequest::range("a", "\0")
            })
            .await
            .unwrap();
        assert_eq!(resp.count, 4);
        assert!(resp.kvs.is_empty());

        // Paging from the last returned key.
        let resp = writer
            .range(&RangeRequest::range("b\0", "\0").with_limit(1))
            .await
            .unwrap();
        assert_eq!(resp.kvs[0].key, b"c".to_vec());
    }
}
