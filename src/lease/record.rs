//! Lease records.
//!
//! `LeaseID -> LeaseRecord{ttl, granted_at, expiry, attached_keys}`, persisted
//! at `lease/<id>` under the reserved prefix.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::time::Tick;

/// A persisted lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Unique lease identifier.
    pub id: i64,

    /// Granted TTL in seconds.
    pub ttl: i64,

    /// Tick when the lease was granted.
    pub granted_at: Tick,

    /// Tick when the lease expires unless renewed.
    pub expiry: Tick,

    /// Keys attached to this lease.
    pub attached_keys: BTreeSet<Vec<u8>>,
}

impl LeaseRecord {
    /// Create a new lease expiring `ttl` seconds after `now`.
    pub fn new(id: i64, ttl: i64, now: Tick) -> Self {
        Self {
            id,
            ttl,
            granted_at: now,
            expiry: now.add_secs(ttl.max(0) as u64),
            attached_keys: BTreeSet::new(),
        }
    }

    /// Check if the lease has expired at the given tick.
    pub fn is_expired_at(&self, now: Tick) -> bool {
        now.is_at_or_after(self.expiry)
    }

    /// Remaining lifetime in whole seconds, rounded up. Zero once expired.
    pub fn remaining_secs_at(&self, now: Tick) -> i64 {
        let ms = now.ms_until(self.expiry);
        ms.div_ceil(1000) as i64
    }

    /// Push the deadline out by a full TTL from `now`.
    pub fn renew(&mut self, now: Tick) {
        self.expiry = now.add_secs(self.ttl.max(0) as u64);
    }

    /// Attach a key to this lease.
    pub fn attach_key(&mut self, key: Vec<u8>) {
        self.attached_keys.insert(key);
    }

    /// Detach a key from this lease.
    pub fn detach_key(&mut self, key: &[u8]) -> bool {
        self.attached_keys.remove(key)
    }
}
