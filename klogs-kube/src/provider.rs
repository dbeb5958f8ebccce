use async_trait::async_trait;
use bytes::Bytes;
use futures::AsyncReadExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
use std::io;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use klogs_core::provider::{InstanceInfo, LogSourceProvider, LogStream};
use klogs_core::{LabelSelector, ProviderError, SourceDescriptor, StreamOpenError, StreamOptions};

/// Chunks buffered between the API connection and the tailer
const CHUNK_BUFFER: usize = 16;
const READ_SIZE: usize = 8 * 1024;

pub struct KubeProvider {
    client: Client,
}

impl KubeProvider {
    /// Connect with the in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self, ProviderError> {
        let client = Client::try_default().await.map_err(|e| {
            ProviderError::Unreachable(format!("Failed to create Kubernetes client: {}", e))
        })?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl LogSourceProvider for KubeProvider {
    async fn list_instances(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<InstanceInfo>, ProviderError> {
        let params = list_params(selector);
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| ProviderError::Unreachable(format!("Failed to list pods: {}", e)))?;
        pods.items.iter().map(instance_info).collect()
    }

    async fn get_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstanceInfo>, ProviderError> {
        let pod = self
            .pods(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ProviderError::Unreachable(format!("Failed to get pod {}: {}", name, e)))?;
        pod.as_ref().map(instance_info).transpose()
    }

    async fn open_log_stream(
        &self,
        source: &SourceDescriptor,
        options: &StreamOptions,
    ) -> Result<LogStream, StreamOpenError> {
        let (opened_tx, opened_rx) = oneshot::channel();
        let (chunks_tx, chunks_rx) = mpsc::channel(CHUNK_BUFFER);
        tokio::spawn(pump(
            self.pods(&source.namespace),
            source.clone(),
            log_params(source, options),
            opened_tx,
            chunks_tx,
        ));

        match opened_rx.await {
            Ok(Ok(())) => Ok(Box::pin(StreamReader::new(ReceiverStream::new(chunks_rx)))),
            Ok(Err(e)) => Err(open_error(source, e)),
            Err(_) => Err(StreamOpenError::Unavailable {
                descriptor: source.clone(),
                message: "log stream task ended before opening".to_string(),
            }),
        }
    }
}

/// Own the API connection for one log stream and forward its bytes until the
/// stream ends or the reader on the other side is dropped.
async fn pump(
    api: Api<Pod>,
    source: SourceDescriptor,
    params: LogParams,
    opened: oneshot::Sender<Result<(), kube::Error>>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
) {
    let reader = match api.log_stream(&source.instance, &params).await {
        Ok(reader) => reader,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };
    if opened.send(Ok(())).is_err() {
        return;
    }
    futures::pin_mut!(reader);

    let mut buf = vec![0u8; READ_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = chunks.closed() => break,
            read = reader.read(&mut buf) => read,
        };
        let chunk = match read {
            Ok(0) => break,
            Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
            Err(e) => {
                warn!("[{}] Log stream read failed: {}", source, e);
                Err(e)
            }
        };
        let failed = chunk.is_err();
        if chunks.send(chunk).await.is_err() || failed {
            break;
        }
    }
    debug!("[{}] Log stream connection released", source);
}

fn list_params(selector: &LabelSelector) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector.to_string())
    }
}

fn log_params(source: &SourceDescriptor, options: &StreamOptions) -> LogParams {
    LogParams {
        container: Some(source.sub_component.clone()),
        follow: options.follow,
        since_seconds: options.since_seconds,
        tail_lines: options.tail_lines,
        timestamps: options.timestamps,
        ..LogParams::default()
    }
}

fn instance_info(pod: &Pod) -> Result<InstanceInfo, ProviderError> {
    let name = pod
        .metadata
        .name
        .clone()
        .ok_or_else(|| ProviderError::Malformed("pod without a name".to_string()))?;
    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| ProviderError::Malformed(format!("pod {} has no spec", name)))?;
    Ok(InstanceInfo::new(
        name,
        spec.containers.iter().map(|container| container.name.clone()),
    ))
}

fn open_error(source: &SourceDescriptor, error: kube::Error) -> StreamOpenError {
    match error {
        kube::Error::Api(response) if response.code == 404 => {
            StreamOpenError::NotFound(source.clone())
        }
        other => StreamOpenError::Unavailable {
            descriptor: source.clone(),
            message: other.to_string(),
        },
    }
}
