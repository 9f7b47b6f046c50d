use crate::error::ClusterError;
use crate::kubernetes::ClusterClient;
use crate::types::{ComputeUnitRef, DeployedResource, DialectInfo, ResourceDescriptor};
use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, trace};

/// Recognises one textual dialect and knows where its live objects are.
#[async_trait]
pub trait ResourceParser: Send + Sync {
    fn identifier(&self) -> &str;

    fn describe(&self) -> DialectInfo;

    /// Decodes `input` if it is written in this dialect.
    fn parse(&self, input: &str) -> Option<ResourceDescriptor>;

    async fn list_resources(
        &self,
        namespace: &str,
        client: &dyn ClusterClient,
    ) -> Result<Vec<DeployedResource>, ClusterError>;

    /// Finds the pod running the resource called `name`, if there is one.
    async fn find_compute_unit(
        &self,
        namespace: &str,
        name: &str,
        client: &dyn ClusterClient,
    ) -> Result<Option<ComputeUnitRef>, ClusterError>;
}

/// Definition of a custom resource dialect, as read from a dialects file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialectConfig {
    pub identifier: String,
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    /// Label put on the resource's pods, whose value is the resource name.
    #[serde(default)]
    pub pod_selector_label: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
}

/// A dialect for any namespaced custom resource, told apart by its `kind`
/// (and `apiVersion`, when the input has one).
#[derive(Debug, Clone)]
pub struct CustomResourceParser {
    identifier: String,
    api: ApiResource,
    pod_selector_label: Option<String>,
    container: Option<String>,
}

impl CustomResourceParser {
    pub fn new(config: DialectConfig) -> Self {
        let gvk = GroupVersionKind::gvk(&config.group, &config.version, &config.kind);
        Self {
            identifier: config.identifier,
            api: ApiResource::from_gvk_with_plural(&gvk, &config.plural),
            pod_selector_label: config.pod_selector_label,
            container: config.container,
        }
    }

    #[cfg(test)]
    pub fn api_resource(&self) -> &ApiResource {
        &self.api
    }

    fn to_deployed(&self, namespace: &str, object: DynamicObject) -> Option<DeployedResource> {
        let name = object.metadata.name.clone()?;
        let namespace = object
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| namespace.to_string());
        Some(DeployedResource {
            name,
            dialect: self.identifier.clone(),
            namespace,
            resource: ResourceDescriptor::new(&self.identifier, self.api.clone(), object),
        })
    }
}

#[async_trait]
impl ResourceParser for CustomResourceParser {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn describe(&self) -> DialectInfo {
        DialectInfo {
            identifier: self.identifier.clone(),
            api_version: self.api.api_version.clone(),
            kind: self.api.kind.clone(),
            plural: self.api.plural.clone(),
            streams_logs: self.pod_selector_label.is_some(),
        }
    }

    fn parse(&self, input: &str) -> Option<ResourceDescriptor> {
        let mut value: Value = match serde_yaml::from_str(input) {
            Ok(value) => value,
            Err(e) => {
                trace!("Input is not {}: {}", self.identifier, e);
                return None;
            }
        };
        let map = value.as_object_mut()?;

        if map.get("kind").and_then(Value::as_str) != Some(self.api.kind.as_str()) {
            return None;
        }
        if let Some(api_version) = map.get("apiVersion").and_then(Value::as_str)
            && api_version != self.api.api_version
        {
            trace!(
                "{} has kind {} but apiVersion {}",
                self.identifier, self.api.kind, api_version
            );
            return None;
        }
        map.insert(
            "apiVersion".to_string(),
            Value::String(self.api.api_version.clone()),
        );
        if !map.get("metadata").is_some_and(Value::is_object) {
            map.insert("metadata".to_string(), Value::Object(Default::default()));
        }
        // YAML reads `name: 123` as a number; cluster names are strings.
        if let Some(name) = map
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .and_then(|metadata| metadata.get_mut("name"))
            && let Value::Number(_) | Value::Bool(_) = name
        {
            *name = Value::String(name.to_string());
        }

        match serde_json::from_value::<DynamicObject>(value) {
            Ok(object) => Some(ResourceDescriptor::new(
                &self.identifier,
                self.api.clone(),
                object,
            )),
            Err(e) => {
                trace!("Input looks like {} but won't decode: {}", self.identifier, e);
                None
            }
        }
    }

    async fn list_resources(
        &self,
        namespace: &str,
        client: &dyn ClusterClient,
    ) -> Result<Vec<DeployedResource>, ClusterError> {
        match client.list(&self.api, namespace).await {
            Ok(objects) => Ok(objects
                .into_iter()
                .filter_map(|object| self.to_deployed(namespace, object))
                .collect()),
            Err(e) if e.is_not_found() => {
                debug!(
                    "{} ({}) is not installed in the cluster: {}",
                    self.api.kind, self.api.api_version, e
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn find_compute_unit(
        &self,
        namespace: &str,
        name: &str,
        client: &dyn ClusterClient,
    ) -> Result<Option<ComputeUnitRef>, ClusterError> {
        let Some(label) = &self.pod_selector_label else {
            return Ok(None);
        };
        let selector = format!("{}={}", label, name.to_lowercase());
        let pods = client.find_pods(namespace, &selector).await?;
        Ok(pods.into_iter().next().map(|unit| ComputeUnitRef {
            container: self.container.clone(),
            ..unit
        }))
    }
}

const CAMEL_GROUP: &str = "camel.apache.org";
const CAMEL_INTEGRATION_LABEL: &str = "camel.apache.org/integration";

/// The dialects every coordinator starts with, in dispatch order.
pub fn builtin_dialects() -> Vec<DialectConfig> {
    vec![
        DialectConfig {
            identifier: "KameletBinding".to_string(),
            group: CAMEL_GROUP.to_string(),
            version: "v1alpha1".to_string(),
            kind: "KameletBinding".to_string(),
            plural: "kameletbindings".to_string(),
            pod_selector_label: Some(CAMEL_INTEGRATION_LABEL.to_string()),
            container: None,
        },
        DialectConfig {
            identifier: "Integration".to_string(),
            group: CAMEL_GROUP.to_string(),
            version: "v1".to_string(),
            kind: "Integration".to_string(),
            plural: "integrations".to_string(),
            pod_selector_label: Some(CAMEL_INTEGRATION_LABEL.to_string()),
            container: None,
        },
        DialectConfig {
            identifier: "Kamelet".to_string(),
            group: CAMEL_GROUP.to_string(),
            version: "v1alpha1".to_string(),
            kind: "Kamelet".to_string(),
            plural: "kamelets".to_string(),
            pod_selector_label: None,
            container: None,
        },
    ]
}

pub fn parse_dialects(yaml: &str) -> anyhow::Result<Vec<DialectConfig>> {
    let dialects: Vec<DialectConfig> = serde_yaml::from_str(yaml)?;
    for dialect in &dialects {
        if dialect.identifier.trim().is_empty() {
            anyhow::bail!("Dialect for kind '{}' has an empty identifier", dialect.kind);
        }
    }
    Ok(dialects)
}

pub fn load_dialects(path: &Path) -> anyhow::Result<Vec<DialectConfig>> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Could not read dialects file {}: {}", path.display(), e))?;
    parse_dialects(&yaml)
}

/// Builds the parser registry: built-in dialects first, then `extra` in
/// the order given.
pub fn build_registry(extra: Vec<DialectConfig>) -> Vec<Box<dyn ResourceParser>> {
    builtin_dialects()
        .into_iter()
        .chain(extra)
        .map(|config| Box::new(CustomResourceParser::new(config)) as Box<dyn ResourceParser>)
        .collect()
}
