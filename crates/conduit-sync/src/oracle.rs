//! Rollout oracle seam

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::identity::MemberId;

/// Reports whether a member's managed workload has finished rolling out
///
/// Implementations perform I/O. The coordinator never calls them while the
/// sync group table is locked, and treats an error as "not converged".
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RolloutOracle: Send + Sync {
    /// True iff no units of the member's workload are still being replaced
    async fn rollout_converged(&self, member: &MemberId) -> conduit_common::Result<bool>;
}
