//! Controller configuration

use std::time::Duration;

use conduit_common::DEFAULT_SYNC_GROUP_ANNOTATION;
use conduit_sync::DEFAULT_RETRY_DELAY;
use conduit_workload::{ProxyConfig, ResourceTemplates};

/// Requeue interval for conduits with nothing left to do
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue interval after a failed reconcile
pub const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(30);

/// Settings of the conduit controller
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Delay before a member waiting on its group's lock is retried
    pub update_retry_delay: Duration,
    /// Periodic requeue of settled conduits
    pub resync_interval: Duration,
    /// Annotation declaring a conduit's update sync group
    pub sync_group_annotation: String,
    /// Proxy rendering settings
    pub proxy: ProxyConfig,
    /// Templates selectable through the `resource-template` annotation
    pub resource_templates: ResourceTemplates,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            update_retry_delay: DEFAULT_RETRY_DELAY,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            sync_group_annotation: DEFAULT_SYNC_GROUP_ANNOTATION.to_string(),
            proxy: ProxyConfig::default(),
            resource_templates: ResourceTemplates::default(),
        }
    }
}
