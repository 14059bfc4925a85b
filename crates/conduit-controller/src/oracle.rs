//! Rollout oracle backed by the live proxy workload

use std::sync::Arc;

use async_trait::async_trait;
use conduit_sync::{MemberId, RolloutOracle};
use conduit_workload::{WorkloadClient, WorkloadRenderer};
use tracing::debug;

/// Answers rollout questions by reading a member's workload from the cluster
///
/// A workload that cannot be found counts as not converged.
#[derive(Clone)]
pub struct WorkloadRolloutOracle {
    renderer: Arc<dyn WorkloadRenderer>,
    workloads: Arc<dyn WorkloadClient>,
}

impl WorkloadRolloutOracle {
    /// Create an oracle resolving members through `renderer`
    pub fn new(renderer: Arc<dyn WorkloadRenderer>, workloads: Arc<dyn WorkloadClient>) -> Self {
        Self {
            renderer,
            workloads,
        }
    }
}

#[async_trait]
impl RolloutOracle for WorkloadRolloutOracle {
    async fn rollout_converged(&self, member: &MemberId) -> conduit_common::Result<bool> {
        let target = self.renderer.workload_ref(member.namespace(), member.name());
        match self.workloads.get_observed(&target).await? {
            Some(observed) => {
                let converged = observed.rollout.is_converged();
                debug!(member = %member, workload = %target, rollout = ?observed.rollout, converged, "checked rollout");
                Ok(converged)
            }
            None => {
                debug!(member = %member, workload = %target, "workload missing, rollout not converged");
                Ok(false)
            }
        }
    }
}
