//! Update coordination for conduits sharing an update sync group
//!
//! Conduits are reconciled independently and concurrently, but conduits that
//! declare the same update sync group must not roll out their proxy workloads
//! at the same time. This crate keeps the bookkeeping that makes that work:
//!
//! - [`SyncGroupTable`]: which members declare which group, and which member
//!   holds each group's update lock. One mutex guards both maps.
//! - [`UpdateCoordinator`]: the per-reconcile decision (apply now, defer, or
//!   nothing), driven by the table and a [`RolloutOracle`].
//!
//! Locks are non-blocking flags. A member that cannot take its group's lock
//! is told to come back after a fixed delay rather than waiting in place.
//! State lives only in memory and is rebuilt from annotations as conduits
//! are reconciled after a restart.

#![deny(missing_docs)]

mod coordinator;
mod identity;
mod oracle;
mod table;

pub use coordinator::{Decision, UpdateCoordinator, DEFAULT_RETRY_DELAY};
pub use identity::{GroupKey, MemberId};
pub use oracle::RolloutOracle;
pub use table::{GroupSnapshot, Membership, SyncGroupTable};
