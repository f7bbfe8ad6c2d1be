//! Lease Engine.
//!
//! Owns the lease table. Every state change runs in one backend snapshot
//! transaction, so revoking a lease deletes its attached keys and the lease
//! record together or not at all.
//!
//! Lease lifecycle: `Granted -> (Renewed)* -> {Revoked | Expired}`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, SnapshotTxn, TxnKv};
use crate::core::error::{EtkvError, EtkvResult};
use crate::core::time::Clock;
use crate::mvcc::RevisionIndex;

use super::record::LeaseRecord;
use super::table;

/// Attempts at drawing an unused lease id before giving up.
const MAX_ID_ATTEMPTS: usize = 16;

/// Lease engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseEngineConfig {
    /// Requested TTLs below this are raised to it.
    pub min_ttl_seconds: i64,
    /// Requested TTLs above this are rejected.
    pub max_ttl_seconds: i64,
}

impl Default for LeaseEngineConfig {
    fn default() -> Self {
        Self {
            min_ttl_seconds: 5,
            max_ttl_seconds: 9_000_000_000,
        }
    }
}

/// Remaining lifetime of a lease.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseTtl {
    pub id: i64,
    /// Remaining seconds, rounded up. 0 once expired, -1 if absent.
    pub ttl: i64,
    pub granted_ttl: i64,
    pub keys: Vec<Vec<u8>>,
}

/// Outcome of a revocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revoked {
    /// Attached keys deleted along with the lease.
    pub deleted: usize,
    /// Store revision after the revocation.
    pub revision: i64,
}

/// Lease engine statistics.
#[derive(Debug, Default)]
struct LeaseEngineStats {
    grants: AtomicU64,
    revokes: AtomicU64,
    renewals: AtomicU64,
    expirations: AtomicU64,
}

/// Lease engine metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeaseEngineMetrics {
    pub grants_total: u64,
    pub revokes_total: u64,
    pub renewals_total: u64,
    pub expirations_total: u64,
}

/// Grants, renews and revokes leases on top of the backend.
pub struct LeaseEngine<B: Backend> {
    config: LeaseEngineConfig,
    index: Arc<RevisionIndex<B>>,
    clock: Arc<dyn Clock>,
    stats: LeaseEngineStats,
}

impl<B: Backend> LeaseEngine<B> {
    pub fn new(config: LeaseEngineConfig, index: Arc<RevisionIndex<B>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            index,
            clock,
            stats: LeaseEngineStats::default(),
        }
    }

    /// Revision index this engine deletes keys through.
    pub fn index(&self) -> &Arc<RevisionIndex<B>> {
        &self.index
    }

    /// Clock used for deadlines.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Enforce TTL bounds.
    fn enforce_ttl(&self, requested: i64) -> EtkvResult<i64> {
        if requested <= 0 {
            return Err(EtkvError::invalid_argument(format!(
                "lease TTL must be positive, got {}",
                requested
            )));
        }
        if requested > self.config.max_ttl_seconds {
            return Err(EtkvError::invalid_argument(format!(
                "lease TTL {} exceeds maximum {}",
                requested, self.config.max_ttl_seconds
            )));
        }
        Ok(requested.max(self.config.min_ttl_seconds))
    }

    /// Grant a lease. An `id` of 0 picks a random unused positive id.
    pub async fn grant(&self, id: i64, ttl: i64) -> EtkvResult<LeaseRecord> {
        if id < 0 {
            return Err(EtkvError::invalid_argument(format!(
                "lease id must not be negative, got {}",
                id
            )));
        }
        let ttl = self.enforce_ttl(ttl)?;
        let lease = self
            .index
            .retry_policy()
            .run("lease_grant", || async move { self.try_grant(id, ttl).await })
            .await?;
        self.stats.grants.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(lease_id = lease.id, ttl, expiry = %lease.expiry, "lease granted");
        Ok(lease)
    }

    async fn try_grant(&self, requested: i64, ttl: i64) -> EtkvResult<LeaseRecord> {
        let mut txn = self.index.backend().begin().await?;
        let id = if requested != 0 {
            if table::load(&mut txn, requested).await?.is_some() {
                return Err(EtkvError::AlreadyExists {
                    lease_id: requested,
                });
            }
            requested
        } else {
            let mut free = None;
            for _ in 0..MAX_ID_ATTEMPTS {
                // ThreadRng is not Send; draw before the await.
                let candidate = rand::rng().random_range(1..=i64::MAX);
                if table::load(&mut txn, candidate).await?.is_none() {
                    free = Some(candidate);
                    break;
                }
            }
            free.ok_or_else(|| EtkvError::internal("could not allocate an unused lease id"))?
        };

        let lease = LeaseRecord::new(id, ttl, self.clock.now());
        table::save(&mut txn, &lease).await?;
        txn.commit().await?;
        Ok(lease)
    }

    /// Revoke a lease, deleting every attached key with it.
    pub async fn revoke(&self, id: i64) -> EtkvResult<Revoked> {
        let revoked = self
            .index
            .retry_policy()
            .run("lease_revoke", || async move {
                match self.try_revoke(id, false).await? {
                    Some(revoked) => Ok(revoked),
                    None => Err(EtkvError::LeaseNotFound { lease_id: id }),
                }
            })
            .await?;
        self.stats.revokes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(lease_id = id, deleted = revoked.deleted, "lease revoked");
        Ok(revoked)
    }

    /// Revoke a lease only if it is still expired when the transaction runs.
    /// Returns `None` if the lease is gone or was renewed in the meantime.
    pub async fn revoke_expired(&self, id: i64) -> EtkvResult<Option<Revoked>> {
        let revoked = self
            .index
            .retry_policy()
            .run("lease_expire", || async move { self.try_revoke(id, true).await })
            .await?;
        if let Some(revoked) = revoked {
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            tracing::info!(lease_id = id, deleted = revoked.deleted, "lease expired");
        }
        Ok(revoked)
    }

    async fn try_revoke(&self, id: i64, only_expired: bool) -> EtkvResult<Option<Revoked>> {
        let floor = self.index.floor();
        let mut txn = self.index.backend().begin().await?;
        let mut writer = self.index.open_writer(&mut txn, floor).await?;
        let base = writer.state().current;

        let Some(lease) = table::load(writer.txn(), id).await? else {
            return Ok(None);
        };
        if only_expired && !lease.is_expired_at(self.clock.now()) {
            return Ok(None);
        }

        let mut deleted = 0;
        for key in &lease.attached_keys {
            if writer.delete_leased(key, id).await? {
                deleted += 1;
            }
        }
        table::remove(writer.txn(), id).await?;
        let committed = writer.finish().await?;
        txn.commit().await?;

        let revision = self.index.settle(base, committed)?;
        Ok(Some(Revoked { deleted, revision }))
    }

    /// Renew a lease to a full TTL from now. Returns the granted TTL.
    pub async fn renew(&self, id: i64) -> EtkvResult<i64> {
        let ttl = self
            .index
            .retry_policy()
            .run("lease_renew", || async move { self.try_renew(id).await })
            .await?;
        self.stats.renewals.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(lease_id = id, ttl, "lease renewed");
        Ok(ttl)
    }

    async fn try_renew(&self, id: i64) -> EtkvResult<i64> {
        let mut txn = self.index.backend().begin().await?;
        let mut lease = table::load(&mut txn, id)
            .await?
            .ok_or(EtkvError::LeaseNotFound { lease_id: id })?;
        let now = self.clock.now();
        if lease.is_expired_at(now) {
            return Err(EtkvError::LeaseExpired { lease_id: id });
        }
        lease.renew(now);
        table::save(&mut txn, &lease).await?;
        txn.commit().await?;
        Ok(lease.ttl)
    }

    /// Remaining lifetime of a lease. An absent lease reports `ttl = -1`.
    pub async fn time_to_live(&self, id: i64, with_keys: bool) -> EtkvResult<LeaseTtl> {
        let Some(lease) = table::load_latest(self.index.backend().as_ref(), id).await? else {
            return Ok(LeaseTtl {
                id,
                ttl: -1,
                ..LeaseTtl::default()
            });
        };
        let keys = if with_keys {
            lease.attached_keys.iter().cloned().collect()
        } else {
            Vec::new()
        };
        Ok(LeaseTtl {
            id,
            ttl: lease.remaining_secs_at(self.clock.now()),
            granted_ttl: lease.ttl,
            keys,
        })
    }

    /// Every lease id in ascending order.
    pub async fn leases(&self) -> EtkvResult<Vec<i64>> {
        let mut txn = self.index.backend().begin().await?;
        let leases = table::scan(&mut txn, 0).await?;
        Ok(leases.iter().map(|lease| lease.id).collect())
    }

    /// Ids of leases whose deadline has passed, at most `limit` of them
    /// (`0` means unbounded).
    pub async fn expired(&self, limit: usize) -> EtkvResult<Vec<i64>> {
        let mut txn = self.index.backend().begin().await?;
        let now = self.clock.now();
        let expired = table::scan(&mut txn, 0)
            .await?
            .into_iter()
            .filter(|lease| lease.is_expired_at(now))
            .map(|lease| lease.id);
        Ok(if limit == 0 {
            expired.collect()
        } else {
            expired.take(limit).collect()
        })
    }

    /// Get lease metrics.
    pub fn metrics(&self) -> LeaseEngineMetrics {
        LeaseEngineMetrics {
            grants_total: self.stats.grants.load(Ordering::Relaxed),
            revokes_total: self.stats.revokes.load(Ordering::Relaxed),
            renewals_total: self.stats.renewals.load(Ordering::Relaxed),
            expirations_total: self.stats.expirations.load(Ordering::Relaxed),
        }
    }
}
