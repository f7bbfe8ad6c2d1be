//! Revision model.
//!
//! A revision is a `(main, sub)` pair. `main` is assigned once per committed
//! mutating transaction across the whole store; `sub` orders the mutations
//! inside that transaction. Revisions are persisted as 16 big-endian bytes so
//! backend key order equals revision order.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::error::{EtkvError, EtkvResult};

/// Revision reported by an empty store.
pub const INITIAL_REVISION: i64 = 1;

/// A global logical timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision {
    /// Commit sequence number.
    pub main: i64,
    /// Index of the mutation within the commit.
    pub sub: i64,
}

impl Revision {
    /// Create a new revision.
    pub const fn new(main: i64, sub: i64) -> Self {
        Self { main, sub }
    }

    /// Encode as 16 big-endian bytes.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&(self.main as u64).to_be_bytes());
        out[8..].copy_from_slice(&(self.sub as u64).to_be_bytes());
        out
    }

    /// Decode from 16 big-endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 16 {
            return None;
        }
        let mut main = [0u8; 8];
        let mut sub = [0u8; 8];
        main.copy_from_slice(&bytes[..8]);
        sub.copy_from_slice(&bytes[8..]);
        Some(Self {
            main: u64::from_be_bytes(main) as i64,
            sub: u64::from_be_bytes(sub) as i64,
        })
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rev:{}.{}", self.main, self.sub)
    }
}

/// Persisted revision counters.
///
/// `current` is the main revision of the latest mutating commit;
/// `compacted` is the compaction watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionState {
    /// Latest committed main revision.
    pub current: i64,
    /// Compaction watermark. Reads below it fail.
    pub compacted: i64,
}

impl Default for RevisionState {
    fn default() -> Self {
        Self {
            current: INITIAL_REVISION,
            compacted: 0,
        }
    }
}

/// Whether a requested read revision can be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionAvailability {
    /// Revision is within `[compacted, current]`.
    Available,
    /// Revision is ahead of the current revision.
    Future,
    /// Revision is below the compaction watermark.
    Compacted,
}

impl RevisionState {
    /// Classify a requested read revision. Zero means "latest".
    pub fn availability(&self, revision: i64) -> RevisionAvailability {
        if revision <= 0 {
            RevisionAvailability::Available
        } else if revision > self.current {
            RevisionAvailability::Future
        } else if revision < self.compacted {
            RevisionAvailability::Compacted
        } else {
            RevisionAvailability::Available
        }
    }

    /// Resolve a requested read revision to a concrete one, or fail.
    pub fn resolve_read(&self, revision: i64) -> EtkvResult<i64> {
        match self.availability(revision) {
            RevisionAvailability::Available if revision <= 0 => Ok(self.current),
            RevisionAvailability::Available => Ok(revision),
            RevisionAvailability::Future => Err(EtkvError::FutureRevision {
                revision,
                current: self.current,
            }),
            RevisionAvailability::Compacted => Err(EtkvError::RevisionCompacted {
                revision,
                compaction_floor: self.compacted,
            }),
        }
    }
}

/// Highest revision this process has observed.
///
/// A transaction samples [`RevisionTracker::observed`] before it begins. The
/// counter it then reads from its snapshot must be at least that high, since
/// every commit counted there finished before the snapshot was taken.
#[derive(Debug)]
pub struct RevisionTracker {
    observed: AtomicI64,
}

impl RevisionTracker {
    /// Create a tracker that has observed nothing yet.
    pub fn new() -> Self {
        Self {
            observed: AtomicI64::new(INITIAL_REVISION),
        }
    }

    /// Highest revision observed.
    pub fn observed(&self) -> i64 {
        self.observed.load(Ordering::Acquire)
    }

    /// Record a read of the persisted counter.
    pub fn observe(&self, revision: i64) {
        self.observed.fetch_max(revision, Ordering::AcqRel);
    }

    /// Check the counter read from a snapshot against the floor sampled
    /// before the snapshot was taken.
    pub fn check_base(&self, floor: i64, base: i64) -> EtkvResult<()> {
        if base < floor {
            tracing::error!(floor, base, "revision counter regressed");
            return Err(EtkvError::internal(format!(
                "revision regression: read {} after observing {}",
                base, floor
            )));
        }
        Ok(())
    }

    /// Record a commit that started from `base` and committed `committed`.
    pub fn record_commit(&self, base: i64, committed: i64) -> EtkvResult<()> {
        if committed <= base {
            tracing::error!(base, committed, "revision counter did not advance");
            return Err(EtkvError::internal(format!(
                "revision regression: committed {} on base {}",
                committed, base
            )));
        }
        self.observe(committed);
        Ok(())
    }
}

impl Default for RevisionTracker {
    fn default() -> Self {
        Self::new()
    }
}
