//! Conduit CRD - a traffic conduit of a trench, served by a proxy DaemonSet
//!
//! Conduits may declare an update sync group through an annotation. Members of
//! the same group never roll out their proxy DaemonSets at the same time.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::Trench;
use crate::TRENCH_LABEL;

/// Spec for a Conduit
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "meridio.nordix.org",
    version = "v1",
    kind = "Conduit",
    plural = "conduits",
    namespaced,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Trench","type":"string","jsonPath":".metadata.labels.trench"}"#
)]
#[serde(rename_all = "kebab-case")]
pub struct ConduitSpec {
    /// Kind of network service the conduit provides
    #[serde(default, rename = "type")]
    pub type_: ConduitType,

    /// Destination port NAT rules applied by the load balancer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_port_nats: Vec<PortNat>,
}

/// Network service type of a conduit
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConduitType {
    /// Stateless load balancer (the only supported type)
    #[default]
    StatelessLb,
}

impl std::fmt::Display for ConduitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatelessLb => write!(f, "stateless-lb"),
        }
    }
}

/// Destination port NAT rule
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PortNat {
    /// Port the traffic arrives on
    pub port: u16,
    /// Port the traffic is forwarded to
    pub target_port: u16,
    /// Transport protocol
    pub protocol: TransportProtocol,
    /// VIPs the rule applies to
    #[serde(default)]
    pub vips: Vec<String>,
}

/// Transport protocol for port NAT rules
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// SCTP
    Sctp,
}

impl Conduit {
    /// Name of the trench this conduit belongs to, from its `trench` label
    pub fn trench_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(TRENCH_LABEL))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Owner references of this conduit with `trench` added
    ///
    /// `None` when the trench already owns the conduit, or has no uid yet.
    /// The trench is a plain owner, not the controller.
    pub fn owner_references_with(&self, trench: &Trench) -> Option<Vec<OwnerReference>> {
        let owner = trench.owner_ref(&())?;
        let current = self.owner_references();
        if current.iter().any(|existing| existing.uid == owner.uid) {
            return None;
        }
        let mut owners = current.to_vec();
        owners.push(owner);
        Some(owners)
    }

    /// Update sync group declared through `annotation_key`
    ///
    /// A missing annotation and an empty value both mean the conduit is not
    /// part of any sync group.
    pub fn sync_group(&self, annotation_key: &str) -> Option<&str> {
        self.annotations()
            .get(annotation_key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_SYNC_GROUP_ANNOTATION;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn conduit(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Conduit {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        Conduit {
            metadata: ObjectMeta {
                name: Some("conduit-a".to_string()),
                namespace: Some("red".to_string()),
                labels: Some(to_map(labels)),
                annotations: Some(to_map(annotations)),
                ..Default::default()
            },
            spec: ConduitSpec::default(),
        }
    }

    #[test]
    fn sync_group_read_from_annotation() {
        let c = conduit(&[], &[(DEFAULT_SYNC_GROUP_ANNOTATION, "group-1")]);
        assert_eq!(c.sync_group(DEFAULT_SYNC_GROUP_ANNOTATION), Some("group-1"));
        assert_eq!(c.sync_group("example.com/other-key"), None);
    }

    #[test]
    fn empty_sync_group_is_absent() {
        let c = conduit(&[], &[(DEFAULT_SYNC_GROUP_ANNOTATION, "  ")]);
        assert_eq!(c.sync_group(DEFAULT_SYNC_GROUP_ANNOTATION), None);
    }

    #[test]
    fn trench_name_from_label() {
        assert_eq!(
            conduit(&[("trench", "trench-a")], &[]).trench_name(),
            Some("trench-a")
        );
        assert_eq!(conduit(&[("trench", "")], &[]).trench_name(), None);
        assert_eq!(conduit(&[], &[]).trench_name(), None);
    }

    #[test]
    fn spec_uses_kebab_case_fields() {
        let wire = serde_json::json!({
            "type": "stateless-lb",
            "destination-port-nats": [
                {"port": 80, "target-port": 8080, "protocol": "tcp", "vips": ["vip-1"]}
            ]
        });
        let spec: ConduitSpec = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(spec.type_, ConduitType::StatelessLb);
        assert_eq!(spec.destination_port_nats[0].target_port, 8080);
        assert_eq!(spec.type_.to_string(), "stateless-lb");
        assert_eq!(serde_json::to_value(&spec).unwrap(), wire);
    }

    #[test]
    fn crd_schema_uses_kebab_case_fields() {
        use kube::CustomResourceExt;

        let crd = serde_json::to_string(&Conduit::crd()).unwrap();
        assert!(crd.contains("destination-port-nats"));
        assert!(crd.contains("target-port"));
        assert!(!crd.contains("destinationPortNats"));
    }

    #[test]
    fn trench_is_added_as_plain_owner_once() {
        use crate::crd::{IpFamily, TrenchSpec};

        let mut trench = Trench::new("trench-a", TrenchSpec { ip_family: IpFamily::Ipv4 });
        let c = conduit(&[("trench", "trench-a")], &[]);
        assert!(c.owner_references_with(&trench).is_none());

        trench.metadata.uid = Some("trench-uid".to_string());
        let owners = c.owner_references_with(&trench).unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Trench");
        assert_eq!(owners[0].uid, "trench-uid");
        assert_ne!(owners[0].controller, Some(true));

        let mut owned = c.clone();
        owned.metadata.owner_references = Some(owners);
        assert!(owned.owner_references_with(&trench).is_none());
    }
}
