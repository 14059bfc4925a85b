//! Workload kinds managed by the operator

use std::fmt;

use conduit_common::{Error, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::ResourceExt;
use serde_json::Value;

use crate::rollout::RolloutStatus;

/// Kind of a managed workload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// apps/v1 DaemonSet
    DaemonSet,
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DaemonSet => write!(f, "DaemonSet"),
            Self::Deployment => write!(f, "Deployment"),
            Self::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// Address of a workload in the cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    /// Workload kind
    pub kind: WorkloadKind,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl WorkloadRef {
    /// Reference to a DaemonSet
    pub fn daemon_set(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::DaemonSet,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A native workload object, desired or observed
#[derive(Clone, Debug, PartialEq)]
pub enum WorkloadSpec {
    /// DaemonSet workload
    DaemonSet(DaemonSet),
    /// Deployment workload
    Deployment(Deployment),
    /// StatefulSet workload
    StatefulSet(StatefulSet),
}

impl WorkloadSpec {
    /// Kind of the wrapped object
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::DaemonSet(_) => WorkloadKind::DaemonSet,
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
        }
    }

    /// Address of the wrapped object
    ///
    /// Fails for objects without a namespace; every managed workload is
    /// namespaced.
    pub fn workload_ref(&self) -> Result<WorkloadRef> {
        let (name, namespace) = match self {
            Self::DaemonSet(o) => (o.name_any(), o.namespace()),
            Self::Deployment(o) => (o.name_any(), o.namespace()),
            Self::StatefulSet(o) => (o.name_any(), o.namespace()),
        };
        let namespace = namespace
            .ok_or_else(|| Error::validation(format!("{} {name} has no namespace", self.kind())))?;
        Ok(WorkloadRef {
            kind: self.kind(),
            namespace,
            name,
        })
    }

    /// The object's `spec` as JSON, `Null` when unset
    pub fn spec_json(&self) -> Result<Value> {
        let spec = match self {
            Self::DaemonSet(o) => serde_json::to_value(&o.spec)?,
            Self::Deployment(o) => serde_json::to_value(&o.spec)?,
            Self::StatefulSet(o) => serde_json::to_value(&o.spec)?,
        };
        Ok(spec)
    }

    /// Value of annotation `key` on the object
    pub fn annotation(&self, key: &str) -> Option<&str> {
        let annotations = match self {
            Self::DaemonSet(o) => o.annotations(),
            Self::Deployment(o) => o.annotations(),
            Self::StatefulSet(o) => o.annotations(),
        };
        annotations.get(key).map(String::as_str)
    }

    /// Rollout counters reported by the object
    pub fn rollout_status(&self) -> RolloutStatus {
        match self {
            Self::DaemonSet(o) => RolloutStatus::from_daemon_set(o),
            Self::Deployment(o) => RolloutStatus::from_deployment(o),
            Self::StatefulSet(o) => RolloutStatus::from_stateful_set(o),
        }
    }
}

impl From<DaemonSet> for WorkloadSpec {
    fn from(ds: DaemonSet) -> Self {
        Self::DaemonSet(ds)
    }
}

impl From<Deployment> for WorkloadSpec {
    fn from(deploy: Deployment) -> Self {
        Self::Deployment(deploy)
    }
}

impl From<StatefulSet> for WorkloadSpec {
    fn from(sts: StatefulSet) -> Self {
        Self::StatefulSet(sts)
    }
}
