//! Lease table access inside backend transactions.
//!
//! The KV write path and the lease engine both go through these functions so
//! that attaching or detaching a key happens in the same backend transaction
//! as the key write itself.

use crate::backend::{AtomicKv, SnapshotTxn};
use crate::core::error::{EtkvError, EtkvResult};
use crate::mvcc::index::{decode, encode};
use crate::mvcc::keys;

use super::record::LeaseRecord;

/// Read a lease record.
pub async fn load<T: SnapshotTxn>(txn: &mut T, id: i64) -> EtkvResult<Option<LeaseRecord>> {
    match txn.get(&keys::lease_key(id)).await? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Read a lease record with a single atomic get, outside any transaction.
pub async fn load_latest<A: AtomicKv + ?Sized>(kv: &A, id: i64) -> EtkvResult<Option<LeaseRecord>> {
    match kv.get(&keys::lease_key(id)).await? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Write a lease record.
pub async fn save<T: SnapshotTxn>(txn: &mut T, lease: &LeaseRecord) -> EtkvResult<()> {
    txn.set(&keys::lease_key(lease.id), &encode(lease)?).await?;
    Ok(())
}

/// Delete a lease record.
pub async fn remove<T: SnapshotTxn>(txn: &mut T, id: i64) -> EtkvResult<()> {
    txn.delete(&keys::lease_key(id)).await?;
    Ok(())
}

/// Every lease record, ordered by id. `limit == 0` means unbounded.
pub async fn scan<T: SnapshotTxn>(txn: &mut T, limit: usize) -> EtkvResult<Vec<LeaseRecord>> {
    let (start, end) = keys::lease_range();
    txn.scan(&start, &end, limit)
        .await?
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect()
}

/// Attach `key` to lease `id`. Fails if the lease does not exist.
pub async fn attach<T: SnapshotTxn>(txn: &mut T, id: i64, key: &[u8]) -> EtkvResult<()> {
    let mut lease = load(txn, id)
        .await?
        .ok_or(EtkvError::LeaseNotFound { lease_id: id })?;
    lease.attach_key(key.to_vec());
    save(txn, &lease).await
}

/// Detach `key` from lease `id`. A missing lease is not an error.
pub async fn detach<T: SnapshotTxn>(txn: &mut T, id: i64, key: &[u8]) -> EtkvResult<()> {
    if let Some(mut lease) = load(txn, id).await? {
        if lease.detach_key(key) {
            save(txn, &lease).await?;
        }
    }
    Ok(())
}
