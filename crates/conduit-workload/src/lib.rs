//! Workload capability layer for the conduit operator
//!
//! Everything the reconciler needs to know about the native workloads it
//! manages, independent of update coordination:
//!
//! - [`WorkloadSpec`]: a DaemonSet, Deployment or StatefulSet, addressed by a
//!   [`WorkloadRef`]
//! - [`RolloutStatus`]: the rollout counters of an observed workload and the
//!   convergence predicate
//! - [`needs_update`]: desired vs observed comparison
//! - [`ProxyRenderer`]: renders the proxy DaemonSet of a conduit
//! - [`ResourceTemplates`]: named container resource requirements
//! - [`WorkloadClient`]: fetch and server-side apply against the cluster

#![deny(missing_docs)]

mod client;
mod diff;
mod proxy;
mod resources;
mod rollout;
mod workload;

pub use client::{KubeWorkloadClient, ObservedWorkload, WorkloadClient};
pub use diff::{is_subset, needs_update};
pub use proxy::{ProxyConfig, ProxyRenderer, WorkloadRenderer, DEFAULT_PROXY_IMAGE, PROXY_CONTAINERS};
pub use resources::{ResourceTemplates, DEFAULT_RESOURCE_TEMPLATE_PATH};
pub use rollout::RolloutStatus;
pub use workload::{WorkloadKind, WorkloadRef, WorkloadSpec};
