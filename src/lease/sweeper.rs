//! Expiry Sweeper.
//!
//! A background task that revokes leases whose deadline has passed. Processes
//! sharing one backend elect a single active sweeper through a lock record
//! stored in the backend itself:
//! - the holder renews `deadline_ms` on every pass
//! - anyone may take over an expired lock, bumping `fencing_token`
//! - a process that does not hold the lock skips the pass
//!
//! Expiry happens at or after the deadline, never before; the sweep interval
//! bounds how late.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{Backend, SnapshotTxn, TxnKv};
use crate::core::error::EtkvResult;
use crate::core::time::{Clock, Tick};
use crate::mvcc::index::{decode, encode};
use crate::mvcc::keys;

use super::engine::LeaseEngine;

/// Sweeper configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Time between passes.
    pub interval_ms: u64,
    /// How long a pass keeps the lock without renewing it.
    pub lock_ttl_ms: u64,
    /// Revocations per pass. 0 means unbounded.
    pub max_revokes_per_sweep: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            lock_ttl_ms: 5_000,
            max_revokes_per_sweep: 1_000,
        }
    }
}

/// Persisted sweeper lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweeperLock {
    pub owner: String,
    pub deadline_ms: u64,
    pub fencing_token: u64,
}

impl SweeperLock {
    fn is_expired_at(&self, now: Tick) -> bool {
        now.is_at_or_after(Tick::new(self.deadline_ms))
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Fencing token held for the pass, `None` if another process holds the lock.
    pub fencing_token: Option<u64>,
    /// Leases revoked in this pass.
    pub revoked: Vec<i64>,
    /// Expired leases whose revocation failed; the next pass retries them.
    pub failed: Vec<i64>,
}

/// Periodic revoker of expired leases.
pub struct Sweeper<B: Backend> {
    engine: Arc<LeaseEngine<B>>,
    config: SweeperConfig,
    owner: String,
}

impl<B: Backend> Sweeper<B> {
    pub fn new(engine: Arc<LeaseEngine<B>>, config: SweeperConfig, owner: impl Into<String>) -> Self {
        Self {
            engine,
            config,
            owner: owner.into(),
        }
    }

    /// Lock owner id of this process.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Acquire or renew the sweeper lock. Returns the fencing token, or
    /// `None` if another live holder has it.
    pub async fn acquire(&self) -> EtkvResult<Option<u64>> {
        self.engine
            .index()
            .retry_policy()
            .run("sweeper_lock", || async move { self.try_acquire().await })
            .await
    }

    async fn try_acquire(&self) -> EtkvResult<Option<u64>> {
        let now = self.engine.clock().now();
        let mut txn = self.engine.index().backend().begin().await?;
        let current: Option<SweeperLock> = match txn.get(&keys::sweeper_lock_key()).await? {
            Some(bytes) => Some(decode(&bytes)?),
            None => None,
        };

        let fencing_token = match current {
            Some(lock) if lock.owner == self.owner => lock.fencing_token,
            Some(lock) if !lock.is_expired_at(now) => {
                tracing::trace!(holder = %lock.owner, deadline_ms = lock.deadline_ms, "sweeper lock held elsewhere");
                return Ok(None);
            }
            Some(lock) => {
                tracing::info!(
                    previous = %lock.owner,
                    fencing_token = lock.fencing_token + 1,
                    "taking over expired sweeper lock"
                );
                lock.fencing_token + 1
            }
            None => 1,
        };

        let lock = SweeperLock {
            owner: self.owner.clone(),
            deadline_ms: now.add_ms(self.config.lock_ttl_ms).ms,
            fencing_token,
        };
        txn.set(&keys::sweeper_lock_key(), &encode(&lock)?).await?;
        txn.commit().await?;
        Ok(Some(fencing_token))
    }

    /// Release the lock if this process holds it. The record stays with an
    /// expired deadline so the next holder still bumps the fencing token.
    pub async fn release(&self) -> EtkvResult<()> {
        let mut txn = self.engine.index().backend().begin().await?;
        if let Some(bytes) = txn.get(&keys::sweeper_lock_key()).await? {
            let mut lock: SweeperLock = decode(&bytes)?;
            if lock.owner == self.owner {
                lock.deadline_ms = 0;
                txn.set(&keys::sweeper_lock_key(), &encode(&lock)?).await?;
                txn.commit().await?;
                tracing::debug!(owner = %self.owner, "sweeper lock released");
            }
        }
        Ok(())
    }

    /// Run one pass: take the lock, then revoke expired leases.
    pub async fn sweep_once(&self) -> EtkvResult<SweepReport> {
        let Some(token) = self.acquire().await? else {
            return Ok(SweepReport::default());
        };

        let mut revoked = Vec::new();
        let mut failed = Vec::new();
        for id in self.engine.expired(self.config.max_revokes_per_sweep).await? {
            // A concurrent renewal wins; the revocation re-checks expiry.
            match self.engine.revoke_expired(id).await {
                Ok(Some(_)) => revoked.push(id),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(lease_id = id, error = %err, "failed to revoke expired lease");
                    failed.push(id);
                }
            }
        }
        if !revoked.is_empty() || !failed.is_empty() {
            tracing::info!(
                fencing_token = token,
                revoked = revoked.len(),
                failed = failed.len(),
                "sweep complete"
            );
        }
        Ok(SweepReport {
            fencing_token: Some(token),
            revoked,
            failed,
        })
    }

    /// Spawn the sweep loop. It stops once `shutdown` flips to `true` or its
    /// sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(owner = %self.owner, interval_ms = self.config.interval_ms, "lease sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once().await {
                            tracing::warn!(error = %err, "lease sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            if let Err(err) = self.release().await {
                tracing::warn!(error = %err, "failed to release sweeper lock");
            }
            tracing::info!(owner = %self.owner, "lease sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::etcd::kv::PutRequest;
    use crate::backend::MemoryBackend;
    use crate::core::time::ManualClock;
    use crate::lease::engine::LeaseEngineConfig;
    use crate::mvcc::{RetryPolicy, RevisionIndex};

    fn engine(clock: Arc<ManualClock>) -> Arc<LeaseEngine<MemoryBackend>> {
        let index = Arc::new(RevisionIndex::new(
            Arc::new(MemoryBackend::new()),
            RetryPolicy::default(),
        ));
        Arc::new(LeaseEngine::new(LeaseEngineConfig::default(), index, clock))
    }

    #[tokio::test]
    async fn sweep_revokes_only_expired_leases() {
        let clock = Arc::new(ManualClock::new(Tick::new(10_000)));
        let engine = engine(clock.clone());
        let sweeper = Sweeper::new(engine.clone(), SweeperConfig::default(), "a");

        let short = engine.grant(0, 5).await.unwrap();
        let long = engine.grant(0, 60).await.unwrap();
        engine
            .index()
            .put(&PutRequest::new("k", "v").with_lease(short.id))
            .await
            .unwrap();

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.fencing_token, Some(1));
        assert!(report.revoked.is_empty());

        clock.advance_secs(5);
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.revoked, vec![short.id]);
        assert!(engine.index().get(b"k", 0).await.unwrap().is_none());
        assert_eq!(engine.time_to_live(short.id, false).await.unwrap().ttl, -1);
        assert_eq!(engine.leases().await.unwrap(), vec![long.id]);
    }

    #[tokio::test]
    async fn sweep_respects_revoke_cap() {
        let clock = Arc::new(ManualClock::new(Tick::new(0)));
        let engine = engine(clock.clone());
        let config = SweeperConfig {
            max_revokes_per_sweep: 2,
            ..SweeperConfig::default()
        };
        let sweeper = Sweeper::new(engine.clone(), config, "a");
        for id in 1..=3 {
            engine.grant(id, 5).await.unwrap();
        }
        clock.advance_secs(6);
        assert_eq!(sweeper.sweep_once().await.unwrap().revoked, vec![1, 2]);
        assert_eq!(sweeper.sweep_once().await.unwrap().revoked, vec![3]);
    }

    #[tokio::test]
    async fn only_one_sweeper_holds_the_lock() {
        let clock = Arc::new(ManualClock::new(Tick::new(0)));
        let engine = engine(clock.clone());
        let a = Sweeper::new(engine.clone(), SweeperConfig::default(), "a");
        let b = Sweeper::new(engine.clone(), SweeperConfig::default(), "b");

        assert_eq!(a.acquire().await.unwrap(), Some(1));
        assert_eq!(b.acquire().await.unwrap(), None);
        assert_eq!(b.sweep_once().await.unwrap(), SweepReport::default());

        // Holder renews without changing the token.
        clock.advance_ms(4_000);
        assert_eq!(a.acquire().await.unwrap(), Some(1));
        clock.advance_ms(4_000);
        assert_eq!(b.acquire().await.unwrap(), None);

        // Once the holder stops renewing, the other takes over.
        clock.advance_ms(2_000);
        assert_eq!(b.acquire().await.unwrap(), Some(2));
        assert_eq!(a.acquire().await.unwrap(), None);

        b.release().await.unwrap();
        assert_eq!(a.acquire().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn spawned_sweeper_stops_on_shutdown() {
        let clock = Arc::new(ManualClock::new(Tick::new(0)));
        let engine = engine(clock.clone());
        let config = SweeperConfig {
            interval_ms: 5,
            ..SweeperConfig::default()
        };
        let sweeper = Arc::new(Sweeper::new(engine.clone(), config, "a"));
        let lease = engine.grant(0, 5).await.unwrap();
        clock.advance_secs(10);

        let (tx, rx) = watch::channel(false);
        let handle = sweeper.spawn(rx);
        for _ in 0..200 {
            if engine.leases().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!engine.leases().await.unwrap().contains(&lease.id));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
