use crate::error::ClusterError;
use crate::types::{ComputeUnitRef, ResourceDescriptor};
use async_trait::async_trait;
use futures::io::AsyncBufReadExt;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::{Api, Client, ResourceExt};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Lines read from a followed log, oldest first.
pub type LineSource = BoxStream<'static, std::io::Result<String>>;

/// The operations the coordinator needs from the orchestration API.
///
/// Implementations are shared across every operation and must be safe to
/// call concurrently.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: &str,
    ) -> Result<(), ClusterError>;

    /// Returns whether anything was removed.
    async fn delete(
        &self,
        api: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ClusterError>;

    async fn list(
        &self,
        api: &ApiResource,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    /// Pods matching `label_selector`, running ones first.
    async fn find_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ComputeUnitRef>, ClusterError>;

    /// Opens a followed log for `unit`, starting `tail_lines` lines back.
    async fn tail_log(
        &self,
        unit: &ComputeUnitRef,
        namespace: &str,
        tail_lines: Option<i64>,
    ) -> Result<LineSource, ClusterError>;
}

/// [`ClusterClient`] backed by a real API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, api: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, api)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: &str,
    ) -> Result<(), ClusterError> {
        let api = self.dynamic_api(&descriptor.api, namespace);
        let mut object = descriptor.object.clone();
        object.metadata.namespace = Some(namespace.to_string());
        api.create(&PostParams::default(), &object).await?;
        Ok(())
    }

    async fn delete(
        &self,
        api: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ClusterError> {
        let dynamic = self.dynamic_api(api, namespace);
        match dynamic.delete(name, &DeleteParams::default()).await {
            // Either the object came back marked for deletion or we got a
            // success status; both mean it is going away.
            Ok(_) => Ok(true),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        api: &ApiResource,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let dynamic = self.dynamic_api(api, namespace);
        let list = dynamic.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn find_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ComputeUnitRef>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut pods = api
            .list(&ListParams::default().labels(label_selector))
            .await?
            .items;
        pods.sort_by_key(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                != Some("Running")
        });
        Ok(pods
            .iter()
            .map(|pod| ComputeUnitRef {
                pod_name: pod.name_any(),
                container: None,
            })
            .collect())
    }

    async fn tail_log(
        &self,
        unit: &ComputeUnitRef,
        namespace: &str,
        tail_lines: Option<i64>,
    ) -> Result<LineSource, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod_name = unit.pod_name.clone();
        let params = LogParams {
            follow: true,
            container: unit.container.clone(),
            tail_lines,
            ..Default::default()
        };

        let (tx, rx) = mpsc::channel(1);
        let (opened_tx, opened_rx) = oneshot::channel();

        // The connection lives in its own task; it is dropped as soon as the
        // receiving side of `tx` goes away.
        tokio::spawn(async move {
            let stream = match api.log_stream(&pod_name, &params).await {
                Ok(stream) => {
                    let _ = opened_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(e));
                    return;
                }
            };

            debug!("Following log for pod {}", pod_name);
            let mut line_stream = stream.lines();
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Log reader for pod {} went away, closing connection", pod_name);
                        return;
                    }
                    next = line_stream.next() => match next {
                        Some(line) => {
                            if tx.send(line).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            debug!("Log stream ended for pod {}", pod_name);
                            return;
                        }
                    }
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| ClusterError::Transport("log task exited before opening".to_string()))??;
        Ok(ReceiverStream::new(rx).boxed())
    }
}
