use kube::core::{ApiResource, DynamicObject, TypeMeta};

/// A to-be-created (or listed) cluster object, tagged with the dialect that
/// produced it.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub dialect: String,
    pub api: ApiResource,
    pub object: DynamicObject,
}

impl ResourceDescriptor {
    pub fn new(dialect: impl Into<String>, api: ApiResource, mut object: DynamicObject) -> Self {
        object.types = Some(TypeMeta {
            api_version: api.api_version.clone(),
            kind: api.kind.clone(),
        });
        Self {
            dialect: dialect.into(),
            api,
            object,
        }
    }

    pub fn group(&self) -> &str {
        &self.api.group
    }

    pub fn version(&self) -> &str {
        &self.api.version
    }

    pub fn kind(&self) -> &str {
        &self.api.kind
    }

    pub fn plural(&self) -> &str {
        &self.api.plural
    }

    /// The object's name, if it has a non-empty one.
    pub fn name(&self) -> Option<&str> {
        self.object
            .metadata
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object.metadata.namespace.as_deref()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.object.metadata.name = Some(name.into());
        self
    }

    pub fn within(mut self, namespace: impl Into<String>) -> Self {
        self.object.metadata.namespace = Some(namespace.into());
        self
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.object)
    }
}

/// One entry of a namespace listing.
#[derive(Debug, Clone)]
pub struct DeployedResource {
    pub name: String,
    pub dialect: String,
    pub namespace: String,
    pub resource: ResourceDescriptor,
}

/// The pod backing a deployed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeUnitRef {
    pub pod_name: String,
    pub container: Option<String>,
}

/// What a registered dialect is and what it can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectInfo {
    pub identifier: String,
    pub api_version: String,
    pub kind: String,
    pub plural: String,
    pub streams_logs: bool,
}
