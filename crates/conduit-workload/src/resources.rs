//! Named container resource templates
//!
//! A conduit picks a template through its `resource-template` annotation.
//! Templates are kept per container in YAML files named after the container
//! under one directory:
//!
//! ```yaml
//! templates:
//! - name: small
//!   resources:
//!     limits:
//!       cpu: 100m
//!       memory: 32Mi
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use conduit_common::{Error, Result};
use k8s_openapi::api::core::v1::ResourceRequirements;
use serde::Deserialize;
use tracing::{debug, info};

/// Directory searched when none is configured
pub const DEFAULT_RESOURCE_TEMPLATE_PATH: &str = "template/resource";

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<NamedTemplate>,
}

#[derive(Debug, Deserialize)]
struct NamedTemplate {
    name: String,
    #[serde(default)]
    resources: ResourceRequirements,
}

/// Resource requirement templates, by container then template name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceTemplates {
    containers: BTreeMap<String, BTreeMap<String, ResourceRequirements>>,
}

impl ResourceTemplates {
    /// Load the template files of `containers` from `dir`
    ///
    /// A container without a file simply has no templates.
    pub fn load(dir: &Path, containers: &[&str]) -> Result<Self> {
        let mut templates = Self::default();
        for container in containers {
            let path = dir.join(container);
            if !path.exists() {
                debug!(path = %path.display(), "no resource templates");
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                Error::internal("resource-templates", format!("read {}: {e}", path.display()))
            })?;
            templates.insert_yaml(container, &raw)?;
        }
        info!(
            dir = %dir.display(),
            containers = templates.containers.len(),
            "loaded resource templates"
        );
        Ok(templates)
    }

    /// Parse a template file for `container`, replacing earlier entries
    pub fn insert_yaml(&mut self, container: &str, raw: &str) -> Result<()> {
        let file: TemplateFile = serde_yaml::from_str(raw)
            .map_err(|e| Error::Serialization(format!("{container} resource templates: {e}")))?;
        let named = file
            .templates
            .into_iter()
            .map(|t| (t.name, t.resources))
            .collect();
        self.containers.insert(container.to_string(), named);
        Ok(())
    }

    /// Requirements of template `template` for `container`
    ///
    /// Naming a template that does not exist is a validation error.
    pub fn lookup(&self, container: &str, template: &str) -> Result<ResourceRequirements> {
        self.containers
            .get(container)
            .and_then(|named| named.get(template))
            .cloned()
            .ok_or_else(|| {
                Error::validation(format!(
                    "container {container}: resource template {template} not found"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    const PROXY_TEMPLATES: &str = r#"
templates:
- name: small
  resources:
    limits:
      cpu: 100m
      memory: 32Mi
    requests:
      cpu: 30m
      memory: 16Mi
- name: large
  resources:
    limits:
      cpu: "1"
      memory: 256Mi
"#;

    #[test]
    fn lookup_finds_named_template() {
        let mut templates = ResourceTemplates::default();
        templates.insert_yaml("proxy", PROXY_TEMPLATES).unwrap();

        let small = templates.lookup("proxy", "small").unwrap();
        let limits = small.limits.unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("100m".to_string())));
        assert_eq!(
            small.requests.unwrap().get("memory"),
            Some(&Quantity("16Mi".to_string()))
        );
    }

    #[test]
    fn unknown_template_or_container_is_rejected() {
        let mut templates = ResourceTemplates::default();
        templates.insert_yaml("proxy", PROXY_TEMPLATES).unwrap();

        assert!(matches!(
            templates.lookup("proxy", "huge"),
            Err(Error::Validation(_))
        ));
        assert!(templates.lookup("sysctl-init", "small").is_err());
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let mut templates = ResourceTemplates::default();
        assert!(matches!(
            templates.insert_yaml("proxy", "templates: {"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = std::env::temp_dir().join("conduit-resource-templates-missing");
        let templates = ResourceTemplates::load(&dir, &["proxy"]).unwrap();
        assert_eq!(templates, ResourceTemplates::default());
    }

    #[test]
    fn load_reads_file_named_after_container() {
        let dir = std::env::temp_dir().join(format!("conduit-resource-templates-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("proxy"), PROXY_TEMPLATES).unwrap();

        let templates = ResourceTemplates::load(&dir, &["proxy"]).unwrap();
        assert!(templates.lookup("proxy", "large").is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
