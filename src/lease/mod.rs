//! Leases.
//!
//! - `record`: the persisted lease record.
//! - `table`: lease table access inside backend transactions.
//! - `engine`: grant, renew, revoke, time-to-live and listing.
//! - `sweeper`: background revocation of expired leases.

pub mod engine;
pub mod record;
pub mod sweeper;
pub mod table;

pub use engine::{LeaseEngine, LeaseEngineConfig, LeaseEngineMetrics, LeaseTtl, Revoked};
pub use record::LeaseRecord;
pub use sweeper::{SweepReport, Sweeper, SweeperConfig, SweeperLock};
