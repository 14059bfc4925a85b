//! Proxy DaemonSet rendering
//!
//! Every conduit is served by one proxy DaemonSet in the conduit's namespace.
//! The proxy attaches pods to the conduit's network service and needs a few
//! forwarding sysctls, set by a privileged init container, that depend on the
//! trench's IP family.

use std::collections::BTreeMap;

use conduit_common::crd::{Conduit, IpFamily, Trench};
use conduit_common::{Error, Result, RESOURCE_TEMPLATE_ANNOTATION};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, ExecAction, LocalObjectReference, PodSpec, PodTemplateSpec, Probe,
    SecurityContext,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};

use crate::resources::ResourceTemplates;
use crate::workload::{WorkloadRef, WorkloadSpec};

/// Proxy image used when none is configured
pub const DEFAULT_PROXY_IMAGE: &str = "registry.nordix.org/cloud-native/meridio/proxy:latest";

/// Image of the sysctl init container
pub const DEFAULT_INIT_IMAGE: &str = "registry.nordix.org/cloud-native/meridio/busybox:1.29";

const PROXY_NAME: &str = "proxy";

/// Containers of the proxy pod that take resource templates
pub const PROXY_CONTAINERS: &[&str] = &[PROXY_NAME];
const IPAM_SERVICE_NAME: &str = "ipam-service";
const NSP_SERVICE_NAME: &str = "nsp-service";
const IPAM_TARGET_PORT: u16 = 7777;
const NSP_TARGET_PORT: u16 = 7778;
const HEALTH_SOCKET: &str = "unix:///tmp/health.sock";

const IPV4_SYSCTL: &str = "sysctl -w net.ipv4.conf.all.forwarding=1 ; sysctl -w net.ipv4.fib_multipath_hash_policy=1 ; sysctl -w net.ipv4.conf.all.rp_filter=0 ; sysctl -w net.ipv4.conf.default.rp_filter=0";
const IPV6_SYSCTL: &str =
    "sysctl -w net.ipv6.conf.all.forwarding=1 ; sysctl -w net.ipv6.fib_multipath_hash_policy=1";
const IPV6_NO_DAD: &str = "sysctl -w net.ipv6.conf.all.accept_dad=0";

/// Renders the desired workload of a conduit
///
/// Rendering is pure: no cluster access, same inputs give the same object.
pub trait WorkloadRenderer: Send + Sync {
    /// Address of the workload managed for conduit `namespace/name`
    fn workload_ref(&self, namespace: &str, conduit: &str) -> WorkloadRef;

    /// Desired workload of `conduit`, attached to `trench`
    fn render(&self, conduit: &Conduit, trench: &Trench) -> Result<WorkloadSpec>;
}

/// Settings shared by every rendered proxy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Prefix prepended to every generated resource name
    pub resource_name_prefix: String,
    /// Proxy container image
    pub image: String,
    /// Sysctl init container image
    pub init_image: String,
    /// Log level passed to the proxy
    pub log_level: String,
    /// Secrets for pulling the proxy images
    pub image_pull_secrets: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            resource_name_prefix: String::new(),
            image: DEFAULT_PROXY_IMAGE.to_string(),
            init_image: DEFAULT_INIT_IMAGE.to_string(),
            log_level: "DEBUG".to_string(),
            image_pull_secrets: Vec::new(),
        }
    }
}

/// Renders conduit proxies as DaemonSets
#[derive(Clone, Debug, Default)]
pub struct ProxyRenderer {
    config: ProxyConfig,
    resources: ResourceTemplates,
}

impl ProxyRenderer {
    /// Create a renderer without resource templates
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            resources: ResourceTemplates::default(),
        }
    }

    /// Resolve `resource-template` annotations against `resources`
    pub fn with_resource_templates(mut self, resources: ResourceTemplates) -> Self {
        self.resources = resources;
        self
    }

    /// Name of the proxy DaemonSet serving `conduit`
    pub fn daemon_set_name(&self, conduit: &str) -> String {
        format!("{}-{conduit}", self.prefixed(PROXY_NAME))
    }

    fn prefixed(&self, name: &str) -> String {
        format!("{}{name}", self.config.resource_name_prefix)
    }

    fn pull_secrets(&self) -> Option<Vec<LocalObjectReference>> {
        let secrets: Vec<_> = self
            .config
            .image_pull_secrets
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| LocalObjectReference {
                name: name.to_string(),
            })
            .collect();
        (!secrets.is_empty()).then_some(secrets)
    }

    fn env(&self, conduit: &str, trench: &str, namespace: &str, ip_family: IpFamily) -> Vec<EnvVar> {
        let ipam_service = format!("{}-{trench}", self.prefixed(IPAM_SERVICE_NAME));
        [
            ("NSM_SERVICE_NAME", format!("{PROXY_NAME}.{conduit}.{trench}.{namespace}")),
            ("NSM_IPAM_SERVICE", format!("{ipam_service}:{IPAM_TARGET_PORT}")),
            ("NSM_NETWORK_SERVICE_NAME", format!("{conduit}.{trench}.{namespace}")),
            ("NSM_IP_FAMILY", ip_family.to_string()),
            ("NSM_TRENCH", trench.to_string()),
            ("NSM_CONDUIT", conduit.to_string()),
            ("NSM_NSP_SERVICE_NAME", self.prefixed(NSP_SERVICE_NAME)),
            ("NSM_NSP_SERVICE_PORT", NSP_TARGET_PORT.to_string()),
            ("NSM_NAMESPACE", namespace.to_string()),
            ("NSM_LOG_LEVEL", self.config.log_level.clone()),
        ]
        .into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value),
            ..Default::default()
        })
        .collect()
    }
}

impl WorkloadRenderer for ProxyRenderer {
    fn workload_ref(&self, namespace: &str, conduit: &str) -> WorkloadRef {
        WorkloadRef::daemon_set(namespace, self.daemon_set_name(conduit))
    }

    fn render(&self, conduit: &Conduit, trench: &Trench) -> Result<WorkloadSpec> {
        let conduit_name = conduit.name_any();
        let namespace = conduit
            .namespace()
            .ok_or_else(|| Error::validation(format!("conduit {conduit_name} has no namespace")))?;
        let trench_name = trench.name_any();
        let name = self.daemon_set_name(&conduit_name);
        let labels = BTreeMap::from([("app".to_string(), name.clone())]);

        let template = conduit
            .annotations()
            .get(RESOURCE_TEMPLATE_ANNOTATION)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty());
        let resources = template
            .map(|template| self.resources.lookup(PROXY_NAME, template))
            .transpose()?;

        let proxy = Container {
            name: PROXY_NAME.to_string(),
            image: Some(self.config.image.clone()),
            image_pull_policy: Some("Always".to_string()),
            env: Some(self.env(
                &conduit_name,
                &trench_name,
                &namespace,
                trench.spec.ip_family,
            )),
            startup_probe: Some(health_check("", 2, 2, 30)),
            readiness_probe: Some(health_check("Readiness", 10, 3, 5)),
            liveness_probe: Some(health_check("", 10, 3, 5)),
            resources,
            ..Default::default()
        };

        let sysctl_init = Container {
            name: "sysctl-init".to_string(),
            image: Some(self.config.init_image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            command: Some(vec!["/bin/sh".to_string()]),
            args: Some(vec!["-c".to_string(), proxy_sysctl(trench.spec.ip_family)]),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let ds = DaemonSet {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace),
                labels: Some(labels.clone()),
                annotations: template.map(|template| {
                    BTreeMap::from([(
                        RESOURCE_TEMPLATE_ANNOTATION.to_string(),
                        template.to_string(),
                    )])
                }),
                owner_references: conduit.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        init_containers: Some(vec![sysctl_init]),
                        containers: vec![proxy],
                        image_pull_secrets: self.pull_secrets(),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        Ok(ds.into())
    }
}

fn proxy_sysctl(ip_family: IpFamily) -> String {
    match ip_family {
        IpFamily::Dualstack => format!("{IPV4_SYSCTL} ; {IPV6_SYSCTL} ; {IPV6_NO_DAD}"),
        IpFamily::Ipv6 => format!("{IPV6_SYSCTL} ; {IPV6_NO_DAD}"),
        IpFamily::Ipv4 => IPV4_SYSCTL.to_string(),
    }
}

fn health_check(service: &str, period: i32, timeout: i32, failure_threshold: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "/bin/grpc_health_probe".to_string(),
                format!("-addr={HEALTH_SOCKET}"),
                format!("-service={service}"),
                "-connect-timeout=100ms".to_string(),
                "-rpc-timeout=150ms".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(0),
        period_seconds: Some(period),
        timeout_seconds: Some(timeout),
        failure_threshold: Some(failure_threshold),
        success_threshold: Some(1),
        ..Default::default()
    }
}
