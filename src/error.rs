//! Error types for the deployment coordinator.
//!
//! [`ClusterError`] covers failures reported by the cluster API or the
//! transport in front of it. [`DeployError`] is what the coordinator's
//! operations return to their caller.

use thiserror::Error;

/// A failure talking to the orchestration API.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server answered, but refused the request.
    #[error("cluster rejected the request ({code}): {message}")]
    Api { code: u16, message: String },

    /// The request never got a usable answer.
    #[error("cluster request failed: {0}")]
    Transport(String),

    /// A resource could not be converted to or from its wire form.
    #[error("could not serialize resource: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Api { code: 404, .. })
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => ClusterError::Api {
                code: resp.code,
                message: resp.message.clone(),
            },
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

/// Errors returned by [`crate::coordinator::Coordinator`].
#[derive(Debug, Error)]
pub enum DeployError {
    /// No dialect could decode the input, or the cluster rejected every
    /// dialect that did. Per-dialect detail only goes to the log.
    #[error("The provided resource is invalid or not supported.")]
    UnsupportedInput,

    /// A dialect was requested by name but is not registered.
    #[error("Unknown dialect '{0}'")]
    UnknownDialect(String),

    /// Collision avoidance gave up after renaming too many times.
    #[error("Couldn't find a free name for '{name}' after {attempts} renames")]
    NameResolution { name: String, attempts: usize },

    /// Nothing with that name is deployed in the namespace.
    #[error("No resource named '{name}' found in namespace '{namespace}'")]
    NotFound { name: String, namespace: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
