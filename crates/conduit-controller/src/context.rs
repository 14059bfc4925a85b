//! Shared controller context

use std::sync::Arc;

use conduit_sync::UpdateCoordinator;
use conduit_workload::{KubeWorkloadClient, ProxyRenderer, WorkloadClient, WorkloadRenderer};
use kube::Client;

use crate::config::ControllerConfig;
use crate::oracle::WorkloadRolloutOracle;
use crate::store::{ConduitStore, KubeConduitStore};

/// Shared context for the Conduit controller
///
/// One instance per process. The coordinator inside holds the only copy of
/// the sync group state.
pub struct ConduitContext {
    /// Conduit and Trench reads
    pub store: Arc<dyn ConduitStore>,
    /// Workload reads and applies
    pub workloads: Arc<dyn WorkloadClient>,
    /// Desired workload rendering
    pub renderer: Arc<dyn WorkloadRenderer>,
    /// Update coordination across sync groups
    pub coordinator: Arc<UpdateCoordinator>,
    /// Rollout oracle handed to the coordinator
    pub oracle: WorkloadRolloutOracle,
    /// Controller settings
    pub config: ControllerConfig,
}

impl ConduitContext {
    /// Context talking to the cluster through `client`
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        let renderer = Arc::new(
            ProxyRenderer::new(config.proxy.clone())
                .with_resource_templates(config.resource_templates.clone()),
        );
        Self::from_parts(
            Arc::new(KubeConduitStore::new(client.clone())),
            Arc::new(KubeWorkloadClient::new(client)),
            renderer,
            config,
        )
    }

    /// Context assembled from explicit collaborators
    pub fn from_parts(
        store: Arc<dyn ConduitStore>,
        workloads: Arc<dyn WorkloadClient>,
        renderer: Arc<dyn WorkloadRenderer>,
        config: ControllerConfig,
    ) -> Self {
        let oracle = WorkloadRolloutOracle::new(Arc::clone(&renderer), Arc::clone(&workloads));
        Self {
            store,
            workloads,
            renderer,
            coordinator: Arc::new(UpdateCoordinator::new(config.update_retry_delay)),
            oracle,
            config,
        }
    }
}
