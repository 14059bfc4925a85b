//! Rollout status of observed workloads

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use serde::Serialize;

/// Rollout counters of a workload, normalized across kinds
///
/// `desired` is the number of units the controller wants, `updated` those
/// running the latest template, `available` those ready long enough to
/// count, and `current` every unit that exists, old or new.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    /// `metadata.generation`
    pub generation: Option<i64>,
    /// `status.observedGeneration`
    pub observed_generation: Option<i64>,
    /// Units wanted
    pub desired: i32,
    /// Units on the latest template
    pub updated: i32,
    /// Units available
    pub available: i32,
    /// Units that exist
    pub current: i32,
}

impl RolloutStatus {
    /// Counters of a DaemonSet, one desired unit per eligible node
    pub fn from_daemon_set(ds: &DaemonSet) -> Self {
        let status = ds.status.as_ref();
        Self {
            generation: ds.metadata.generation,
            observed_generation: status.and_then(|s| s.observed_generation),
            desired: status.map_or(0, |s| s.desired_number_scheduled),
            updated: status.and_then(|s| s.updated_number_scheduled).unwrap_or(0),
            available: status.and_then(|s| s.number_available).unwrap_or(0),
            current: status.map_or(0, |s| s.current_number_scheduled),
        }
    }

    /// Counters of a Deployment; `spec.replicas` defaults to 1
    pub fn from_deployment(deploy: &Deployment) -> Self {
        let status = deploy.status.as_ref();
        Self {
            generation: deploy.metadata.generation,
            observed_generation: status.and_then(|s| s.observed_generation),
            desired: deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            updated: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            available: status.and_then(|s| s.available_replicas).unwrap_or(0),
            current: status.and_then(|s| s.replicas).unwrap_or(0),
        }
    }

    /// Counters of a StatefulSet; `spec.replicas` defaults to 1
    pub fn from_stateful_set(sts: &StatefulSet) -> Self {
        let status = sts.status.as_ref();
        Self {
            generation: sts.metadata.generation,
            observed_generation: status.and_then(|s| s.observed_generation),
            desired: sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            updated: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            available: status.and_then(|s| s.available_replicas).unwrap_or(0),
            current: status.map_or(0, |s| s.replicas),
        }
    }

    /// True iff no unit is still being replaced
    ///
    /// The controller must have seen the latest generation, every desired
    /// unit must be updated and available, and no surplus old unit may
    /// remain.
    pub fn is_converged(&self) -> bool {
        if let Some(generation) = self.generation {
            if self.observed_generation.unwrap_or(0) < generation {
                return false;
            }
        }
        self.updated >= self.desired && self.available >= self.desired && self.current <= self.desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{
        DaemonSetStatus, DeploymentSpec, DeploymentStatus, StatefulSetSpec, StatefulSetStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn daemon_set(generation: i64, status: DaemonSetStatus) -> DaemonSet {
        DaemonSet {
            metadata: ObjectMeta {
                generation: Some(generation),
                ..Default::default()
            },
            status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn scheduled_but_not_started_daemon_set_is_not_converged() {
        let ds = daemon_set(
            1,
            DaemonSetStatus {
                desired_number_scheduled: 1,
                observed_generation: Some(1),
                ..Default::default()
            },
        );
        assert!(!RolloutStatus::from_daemon_set(&ds).is_converged());
    }

    #[test]
    fn empty_daemon_set_is_converged() {
        let ds = daemon_set(
            1,
            DaemonSetStatus {
                observed_generation: Some(1),
                ..Default::default()
            },
        );
        assert!(RolloutStatus::from_daemon_set(&ds).is_converged());
    }

    #[test]
    fn fully_rolled_daemon_set_is_converged() {
        let ds = daemon_set(
            3,
            DaemonSetStatus {
                observed_generation: Some(3),
                desired_number_scheduled: 2,
                current_number_scheduled: 2,
                updated_number_scheduled: Some(2),
                number_available: Some(2),
                ..Default::default()
            },
        );
        assert!(RolloutStatus::from_daemon_set(&ds).is_converged());
    }

    #[test]
    fn unobserved_generation_is_not_converged() {
        let ds = daemon_set(
            4,
            DaemonSetStatus {
                observed_generation: Some(3),
                desired_number_scheduled: 2,
                current_number_scheduled: 2,
                updated_number_scheduled: Some(2),
                number_available: Some(2),
                ..Default::default()
            },
        );
        assert!(!RolloutStatus::from_daemon_set(&ds).is_converged());
    }

    #[test]
    fn missing_status_is_not_converged() {
        let ds = DaemonSet {
            metadata: ObjectMeta {
                generation: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!RolloutStatus::from_daemon_set(&ds).is_converged());
    }

    #[test]
    fn deployment_with_surplus_old_replicas_is_not_converged() {
        let deploy = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                replicas: Some(3),
                updated_replicas: Some(2),
                available_replicas: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        let status = RolloutStatus::from_deployment(&deploy);
        assert_eq!(status.current, 3);
        assert!(!status.is_converged());
    }

    #[test]
    fn deployment_replicas_default_to_one() {
        let deploy = Deployment {
            status: Some(DeploymentStatus {
                replicas: Some(1),
                updated_replicas: Some(1),
                available_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let status = RolloutStatus::from_deployment(&deploy);
        assert_eq!(status.desired, 1);
        assert!(status.is_converged());
    }

    #[test]
    fn stateful_set_waiting_for_availability() {
        let sts = StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas: Some(3),
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                replicas: 3,
                updated_replicas: Some(3),
                available_replicas: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!RolloutStatus::from_stateful_set(&sts).is_converged());
    }
}
