//! Fresh reads of conduits and trenches

use async_trait::async_trait;
use conduit_common::crd::{Conduit, Trench};
use conduit_common::{Error, Result};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;

#[cfg(test)]
use mockall::automock;

/// Source of the current Conduit and Trench objects
///
/// The reconciler re-reads the conduit instead of trusting the watch event,
/// so a deletion or annotation change that raced the event is seen.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConduitStore: Send + Sync {
    /// Current conduit `namespace/name`, `None` once deleted
    async fn get_conduit(&self, namespace: &str, name: &str) -> Result<Option<Conduit>>;

    /// Current trench `namespace/name`, `None` if it does not exist
    async fn get_trench(&self, namespace: &str, name: &str) -> Result<Option<Trench>>;

    /// Add `trench` to the conduit's owner references
    async fn adopt_conduit(&self, conduit: &Conduit, trench: &Trench) -> Result<()>;
}

/// [`ConduitStore`] reading from the API server
#[derive(Clone)]
pub struct KubeConduitStore {
    client: Client,
}

impl KubeConduitStore {
    /// Create a store
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConduitStore for KubeConduitStore {
    async fn get_conduit(&self, namespace: &str, name: &str) -> Result<Option<Conduit>> {
        let api: Api<Conduit> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_trench(&self, namespace: &str, name: &str) -> Result<Option<Trench>> {
        let api: Api<Trench> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn adopt_conduit(&self, conduit: &Conduit, trench: &Trench) -> Result<()> {
        let Some(owners) = conduit.owner_references_with(trench) else {
            return Ok(());
        };
        let namespace = conduit
            .namespace()
            .ok_or_else(|| Error::validation(format!("conduit {} has no namespace", conduit.name_any())))?;

        // The resourceVersion turns a concurrent owner change into a conflict
        let patch = json!({
            "metadata": {
                "ownerReferences": owners,
                "resourceVersion": conduit.resource_version(),
            }
        });
        let api: Api<Conduit> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(&conduit.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
