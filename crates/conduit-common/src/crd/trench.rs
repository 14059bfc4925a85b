//! Trench CRD - the network isolation domain conduits attach to

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec for a Trench
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "meridio.nordix.org",
    version = "v1",
    kind = "Trench",
    plural = "trenches",
    namespaced,
    printcolumn = r#"{"name":"IP-Family","type":"string","jsonPath":".spec.ip-family"}"#
)]
pub struct TrenchSpec {
    /// IP family served inside the trench
    #[serde(default, rename = "ip-family")]
    pub ip_family: IpFamily,
}

/// IP family of a trench
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4 and IPv6
    #[default]
    Dualstack,
    /// IPv4 only
    Ipv4,
    /// IPv6 only
    Ipv6,
}

impl std::fmt::Display for IpFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dualstack => write!(f, "dualstack"),
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn ip_family_defaults_to_dualstack() {
        let spec: TrenchSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.ip_family, IpFamily::Dualstack);

        let spec: TrenchSpec =
            serde_json::from_value(serde_json::json!({"ip-family": "ipv6"})).unwrap();
        assert_eq!(spec.ip_family.to_string(), "ipv6");
    }

    #[test]
    fn crds_render_to_yaml() {
        let yaml = serde_yaml::to_string(&Trench::crd()).unwrap();
        assert!(yaml.contains("trenches.meridio.nordix.org"));
        let yaml = serde_yaml::to_string(&crate::crd::Conduit::crd()).unwrap();
        assert!(yaml.contains("conduits.meridio.nordix.org"));
    }
}
