//! Per-reconcile update decision for sync group members
//!
//! | situation | decision |
//! |---|---|
//! | no group | apply if an update is needed, table untouched |
//! | no update needed, holder | release once the rollout converged |
//! | update needed, holder | apply once the previous rollout converged, else defer |
//! | update needed, moved here from another group this pass | defer |
//! | update needed, lock free | take the lock and apply, defer if the race is lost |
//! | update needed, lock held by another member | defer |

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::identity::{GroupKey, MemberId};
use crate::oracle::RolloutOracle;
use crate::table::{GroupSnapshot, SyncGroupTable};

/// Delay before a deferred member is reconciled again
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// What the reconciler should do with a member's pending update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Apply the desired workload now
    ApplyNow,
    /// Leave the workload alone and reconcile again after the delay
    DeferFor(Duration),
    /// Nothing to apply
    NoOp,
}

/// Decides, per reconcile, whether a member may roll out its workload
///
/// Owns the [`SyncGroupTable`]. Decisions only depend on the table, the
/// member's declared group, whether its workload differs from the desired
/// one, and the rollout oracle's answer.
#[derive(Debug)]
pub struct UpdateCoordinator {
    table: SyncGroupTable,
    retry_delay: Duration,
}

impl Default for UpdateCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl UpdateCoordinator {
    /// Create a coordinator with an empty table and a fixed retry delay
    // TODO: switch to a capped exponential delay if contention on large sync groups shows up in practice
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            table: SyncGroupTable::new(),
            retry_delay,
        }
    }

    /// Delay handed out with [`Decision::DeferFor`]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// The underlying registry and lock table
    pub fn table(&self) -> &SyncGroupTable {
        &self.table
    }

    /// Decide what to do with `member`'s workload on this reconcile
    ///
    /// Records `group` as the member's current group first, so a rename or a
    /// removed annotation releases the old group's lock before anything else.
    pub async fn decide<O>(
        &self,
        member: &MemberId,
        group: Option<&GroupKey>,
        update_needed: bool,
        oracle: &O,
    ) -> Decision
    where
        O: RolloutOracle + ?Sized,
    {
        let membership = self.table.observe(member, group);
        if membership.changed {
            info!(
                member = %member,
                previous = membership.previous.as_ref().map(GroupKey::as_str),
                group = group.map(GroupKey::as_str),
                released_lock = membership.released_lock,
                "update sync group changed"
            );
        }

        let Some(group) = group else {
            return if update_needed {
                Decision::ApplyNow
            } else {
                Decision::NoOp
            };
        };

        if !update_needed {
            if self.table.is_holder(group, member) {
                if self.converged(oracle, member).await {
                    if self.table.release(group, member) {
                        info!(member = %member, group = %group, "rollout finished, lock released");
                    }
                } else {
                    debug!(member = %member, group = %group, "rollout ongoing, keeping lock");
                }
            }
            return Decision::NoOp;
        }

        if self.table.is_holder(group, member) {
            if self.converged(oracle, member).await {
                debug!(member = %member, group = %group, "applying follow-up update under held lock");
                return Decision::ApplyNow;
            }
            debug!(member = %member, group = %group, "previous rollout still in flight, deferring");
            return self.defer();
        }

        if membership.changed && membership.previous.is_some() {
            debug!(
                member = %member,
                group = %group,
                "joined group this pass, competing for its lock on a later reconcile"
            );
            return self.defer();
        }

        if self.table.try_acquire(group, member) {
            info!(member = %member, group = %group, "update lock acquired");
            return Decision::ApplyNow;
        }

        debug!(
            member = %member,
            group = %group,
            holder = self.table.holder(group).as_ref().map(MemberId::as_str),
            "update locked by another member, deferring"
        );
        self.defer()
    }

    /// Whether `member` holds the lock of the group it was last observed in
    pub fn holds_lock(&self, member: &MemberId) -> bool {
        self.table
            .group_of(member)
            .is_some_and(|group| self.table.is_holder(&group, member))
    }

    /// Forget a deleted member, releasing any lock it held
    ///
    /// Safe to call for members that were never in a group and to call more
    /// than once.
    pub fn handle_deletion(&self, member: &MemberId) -> Option<GroupKey> {
        match self.table.forget(member) {
            Some((group, released)) => {
                info!(member = %member, group = %group, released_lock = released, "removed deleted member from sync group");
                Some(group)
            }
            None => {
                debug!(member = %member, "deleted member was not part of any sync group");
                None
            }
        }
    }

    /// Every member currently registered in some group
    pub fn members(&self) -> Vec<MemberId> {
        self.table
            .groups()
            .into_iter()
            .flat_map(|snapshot| snapshot.members)
            .collect()
    }

    /// Groups with their members and holders
    pub fn groups(&self) -> Vec<GroupSnapshot> {
        self.table.groups()
    }

    /// Held locks by group
    pub fn locks(&self) -> BTreeMap<GroupKey, MemberId> {
        self.table.locks()
    }

    fn defer(&self) -> Decision {
        Decision::DeferFor(self.retry_delay)
    }

    async fn converged<O>(&self, oracle: &O, member: &MemberId) -> bool
    where
        O: RolloutOracle + ?Sized,
    {
        match oracle.rollout_converged(member).await {
            Ok(converged) => converged,
            Err(e) => {
                warn!(member = %member, error = %e, "rollout status unknown, treating as in progress");
                false
            }
        }
    }
}
