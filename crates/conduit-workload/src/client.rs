//! Cluster access for managed workloads

use async_trait::async_trait;
use conduit_common::{Result, FIELD_MANAGER};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::rollout::RolloutStatus;
use crate::workload::{WorkloadKind, WorkloadRef, WorkloadSpec};

/// A workload as it currently exists in the cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedWorkload {
    /// The live object
    pub workload: WorkloadSpec,
    /// Its rollout counters
    pub rollout: RolloutStatus,
}

impl ObservedWorkload {
    /// Wrap a live object, extracting its rollout counters
    pub fn new(workload: WorkloadSpec) -> Self {
        let rollout = workload.rollout_status();
        Self { workload, rollout }
    }
}

/// Reads and writes managed workloads
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Fetch the live workload, `None` when it does not exist
    async fn get_observed(&self, workload: &WorkloadRef) -> Result<Option<ObservedWorkload>>;

    /// Create or update the workload to match `desired`
    async fn apply(&self, desired: &WorkloadSpec) -> Result<()>;
}

/// [`WorkloadClient`] backed by the Kubernetes API
///
/// Reads go straight to the API server so rollout decisions never act on a
/// stale cache. Writes are forced server-side applies.
#[derive(Clone)]
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get<K>(&self, workload: &WorkloadRef) -> Result<Option<K>>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        Ok(api.get_opt(&workload.name).await?)
    }

    async fn patch<K>(&self, workload: &WorkloadRef, object: &K) -> Result<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        api.patch(
            &workload.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(object),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn get_observed(&self, workload: &WorkloadRef) -> Result<Option<ObservedWorkload>> {
        let live: Option<WorkloadSpec> = match workload.kind {
            WorkloadKind::DaemonSet => self.get::<DaemonSet>(workload).await?.map(Into::into),
            WorkloadKind::Deployment => self.get::<Deployment>(workload).await?.map(Into::into),
            WorkloadKind::StatefulSet => self.get::<StatefulSet>(workload).await?.map(Into::into),
        };
        Ok(live.map(ObservedWorkload::new))
    }

    async fn apply(&self, desired: &WorkloadSpec) -> Result<()> {
        let workload = desired.workload_ref()?;
        match desired {
            WorkloadSpec::DaemonSet(ds) => self.patch(&workload, ds).await?,
            WorkloadSpec::Deployment(deploy) => self.patch(&workload, deploy).await?,
            WorkloadSpec::StatefulSet(sts) => self.patch(&workload, sts).await?,
        }
        debug!(workload = %workload, "applied workload");
        Ok(())
    }
}
