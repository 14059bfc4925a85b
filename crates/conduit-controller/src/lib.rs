//! Conduit controller
//!
//! Reconciles `Conduit` resources into proxy DaemonSets. Updates of existing
//! proxies are serialized per update sync group through
//! [`conduit_sync::UpdateCoordinator`]; creations and conduits outside any
//! group are applied directly.

#![deny(missing_docs)]

mod config;
mod context;
mod controller;
mod oracle;
mod store;

pub use config::{ControllerConfig, DEFAULT_RESYNC_INTERVAL, ERROR_REQUEUE_INTERVAL};
pub use context::ConduitContext;
pub use controller::{error_policy, handle_deletion, prune_vanished, reconcile};
pub use oracle::WorkloadRolloutOracle;
pub use store::{ConduitStore, KubeConduitStore};
