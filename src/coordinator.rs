use crate::error::DeployError;
use crate::kubernetes::ClusterClient;
use crate::logs::{LOG_BUFFER_CAPACITY, LogStream};
use crate::parser::ResourceParser;
use crate::types::{DeployedResource, DialectInfo, ResourceDescriptor};
use crate::utils::{names_match, non_blank};
use std::sync::Arc;
use tracing::{Span, debug, field, info, instrument, trace, warn};

/// Prefix of names synthesised for resources that arrive without one.
pub const GENERATED_NAME_PREFIX: &str = "integration-";

/// How many times a colliding name is rewritten before giving up.
pub const MAX_RENAME_ATTEMPTS: usize = 5;

/// Called once for every object the coordinator creates.
pub type CreationHook = Arc<dyn Fn(&ResourceDescriptor) + Send + Sync>;

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Turns textual resource descriptions into cluster objects and manages
/// them afterwards.
///
/// The cluster is the only source of truth: nothing about created objects
/// is remembered here, every lookup goes through a fresh listing.
pub struct Coordinator {
    client: Arc<dyn ClusterClient>,
    parsers: Vec<Box<dyn ResourceParser>>,
    default_namespace: String,
    clock: Clock,
    on_created: Option<CreationHook>,
}

impl Coordinator {
    /// `parsers` are tried in the order given.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        parsers: Vec<Box<dyn ResourceParser>>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            parsers,
            default_namespace: default_namespace.into(),
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
            on_created: None,
        }
    }

    pub fn with_creation_hook(mut self, hook: CreationHook) -> Self {
        self.on_created = Some(hook);
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn resolve_namespace(&self, namespace: Option<&str>) -> String {
        non_blank(namespace)
            .unwrap_or(&self.default_namespace)
            .to_string()
    }

    pub fn dialects(&self) -> Vec<DialectInfo> {
        self.parsers.iter().map(|p| p.describe()).collect()
    }

    fn parsers_for<'a>(
        &'a self,
        dialect: Option<&'a str>,
    ) -> impl Iterator<Item = &'a dyn ResourceParser> + 'a {
        let dialect = non_blank(dialect);
        self.parsers
            .iter()
            .map(|p| p.as_ref())
            .filter(move |p| dialect.is_none_or(|d| names_match(d, p.identifier())))
    }

    /// Everything deployed in `namespace`, grouped by dialect in registry
    /// order.
    #[instrument(skip(self))]
    pub async fn get_resources(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<DeployedResource>, DeployError> {
        let namespace = self.resolve_namespace(namespace);
        let mut resources = Vec::new();
        for parser in &self.parsers {
            let found = parser
                .list_resources(&namespace, self.client.as_ref())
                .await?;
            trace!(
                "{} {} resources in {}",
                found.len(),
                parser.identifier(),
                namespace
            );
            resources.extend(found);
        }
        Ok(resources)
    }

    /// Deploys `input` with the first dialect that both decodes it and gets
    /// it accepted by the cluster.
    #[instrument(skip_all, fields(namespace = field::Empty, integration = field::Empty))]
    pub async fn start(&self, input: &str, namespace: Option<&str>) -> Result<(), DeployError> {
        let namespace = self.resolve_namespace(namespace);
        Span::current().record("namespace", namespace.as_str());

        for parser in &self.parsers {
            trace!("Trying parser for {}", parser.identifier());
            let Some(descriptor) = parser.parse(input) else {
                continue;
            };
            trace!("This is a {}", descriptor.kind());

            let descriptor = self.assign_name(descriptor, Some(namespace.as_str())).await?;
            match self.client.create(&descriptor, &namespace).await {
                Ok(()) => {
                    self.created(&descriptor, &namespace);
                    return Ok(());
                }
                Err(e) => {
                    debug!(
                        "Either the {} is not right or the CRD is not valid: {}",
                        parser.identifier(),
                        e
                    );
                }
            }
        }

        Err(DeployError::UnsupportedInput)
    }

    /// Decodes `input` with one specific dialect.
    pub fn parse_as(&self, dialect: &str, input: &str) -> Result<ResourceDescriptor, DeployError> {
        let parser = self
            .parsers_for(Some(dialect))
            .next()
            .ok_or_else(|| DeployError::UnknownDialect(dialect.to_string()))?;
        parser.parse(input).ok_or(DeployError::UnsupportedInput)
    }

    /// Names and creates an already decoded resource. Cluster errors are
    /// returned as they are.
    #[instrument(skip_all, fields(namespace = field::Empty, integration = field::Empty))]
    pub async fn start_descriptor(
        &self,
        descriptor: ResourceDescriptor,
        namespace: Option<&str>,
    ) -> Result<(), DeployError> {
        let namespace = self.resolve_namespace(namespace);
        Span::current().record("namespace", namespace.as_str());

        let descriptor = self.assign_name(descriptor, Some(namespace.as_str())).await?;
        self.client.create(&descriptor, &namespace).await?;
        self.created(&descriptor, &namespace);
        Ok(())
    }

    fn created(&self, descriptor: &ResourceDescriptor, namespace: &str) {
        info!(
            "Created {} ({}/{}) {} in {} as {}",
            descriptor.kind(),
            descriptor.group(),
            descriptor.version(),
            descriptor.name().unwrap_or_default(),
            namespace,
            descriptor.dialect
        );
        if let Ok(yaml) = descriptor.to_yaml() {
            Span::current().record("integration", yaml.as_str());
        }
        if let Some(hook) = &self.on_created {
            hook(descriptor);
        }
    }

    /// Gives `descriptor` a lowercase name that nothing in `namespace`
    /// already uses.
    ///
    /// A missing name becomes `integration-<millis>`. On a collision the
    /// current timestamp is appended and the listing checked again, at most
    /// [`MAX_RENAME_ATTEMPTS`] times. There is no lock between this check and
    /// the create that follows it.
    pub async fn assign_name(
        &self,
        descriptor: ResourceDescriptor,
        namespace: Option<&str>,
    ) -> Result<ResourceDescriptor, DeployError> {
        let namespace = self.resolve_namespace(namespace);
        let mut candidate = match descriptor.name() {
            Some(name) => name.to_lowercase(),
            None => format!("{}{}", GENERATED_NAME_PREFIX, (self.clock)()),
        };

        let mut renames = 0;
        loop {
            let existing = self.get_resources(Some(namespace.as_str())).await?;
            if !existing.iter().any(|r| names_match(&r.name, &candidate)) {
                return Ok(descriptor.with_name(candidate).within(namespace));
            }

            warn!(
                "There is an existing resource with the same name: {}",
                candidate
            );
            if renames == MAX_RENAME_ATTEMPTS {
                return Err(DeployError::NameResolution {
                    name: candidate,
                    attempts: renames,
                });
            }
            renames += 1;
            candidate = format!("{}{}", candidate, (self.clock)());
            warn!("Renaming to: {}", candidate);
        }
    }

    /// The first resource called `name` (any case), optionally limited to
    /// one dialect.
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        namespace: Option<&str>,
        name: &str,
        dialect: Option<&str>,
    ) -> Result<Option<ResourceDescriptor>, DeployError> {
        let dialect = non_blank(dialect);
        let resources = self.get_resources(namespace).await?;
        Ok(resources
            .into_iter()
            .find(|r| {
                names_match(&r.name, name) && dialect.is_none_or(|d| names_match(&r.dialect, d))
            })
            .map(|r| r.resource))
    }

    /// Deletes the resource called `name`. Returns whether the cluster
    /// removed anything.
    #[instrument(skip(self))]
    pub async fn stop(
        &self,
        name: &str,
        namespace: Option<&str>,
        dialect: Option<&str>,
    ) -> Result<bool, DeployError> {
        let namespace = self.resolve_namespace(namespace);
        let Some(resource) = self.get(Some(namespace.as_str()), name, dialect).await? else {
            return Err(DeployError::NotFound {
                name: name.to_string(),
                namespace,
            });
        };

        let target = resource.name().unwrap_or(name);
        debug!(
            "Going to delete a {} in {} with name {}",
            resource.kind(),
            namespace,
            target
        );
        Ok(self
            .client
            .delete(&resource.api, &namespace, target)
            .await?)
    }

    /// Follows the log of the pod behind `name`, starting `tail_lines` lines
    /// back.
    ///
    /// Fails before opening anything if no dialect can find a pod. Read
    /// errors after that end the stream instead of being returned.
    #[instrument(skip(self))]
    pub async fn stream_logs(
        &self,
        namespace: Option<&str>,
        name: &str,
        dialect: Option<&str>,
        tail_lines: Option<i64>,
    ) -> Result<LogStream, DeployError> {
        let namespace = self.resolve_namespace(namespace);

        // Names are assumed unique across dialects: the first pod found is
        // the one.
        let mut unit = None;
        for parser in self.parsers_for(dialect) {
            unit = parser
                .find_compute_unit(&namespace, name, self.client.as_ref())
                .await?;
            if unit.is_some() {
                break;
            }
        }
        let Some(unit) = unit else {
            return Err(DeployError::NotFound {
                name: name.to_string(),
                namespace,
            });
        };

        debug!("Tailing pod {} for {} in {}", unit.pod_name, name, namespace);
        let source = self.client.tail_log(&unit, &namespace, tail_lines).await?;
        Ok(LogStream::spawn(source, LOG_BUFFER_CAPACITY, unit.pod_name))
    }
}
