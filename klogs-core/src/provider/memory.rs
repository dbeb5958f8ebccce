//! Scripted in-process provider. Serves fixed log content per container and
//! counts live streams, which makes session behavior observable without a
//! cluster.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

use super::{InstanceInfo, LogSourceProvider, LogStream};
use crate::error::{ProviderError, StreamOpenError};
use crate::source::{LabelSelector, SourceDescriptor, StreamOptions};

#[derive(Debug, Clone)]
enum StreamEnd {
    Eof,
    Follow,
    Error(String),
}

#[derive(Debug, Clone)]
enum ScriptKind {
    Stream { chunks: Vec<Bytes>, end: StreamEnd },
    Unreachable(String),
}

/// What a container's log stream does once opened
#[derive(Debug, Clone)]
pub struct Script(ScriptKind);

impl Script {
    /// Newline-terminated lines followed by end of stream
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::raw(lines.into_iter().map(|line| format!("{}\n", line.as_ref())))
    }

    /// Raw chunks delivered as-is, without adding delimiters
    pub fn raw<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Script(ScriptKind::Stream {
            chunks: chunks.into_iter().map(Into::into).collect(),
            end: StreamEnd::Eof,
        })
    }

    /// A stream that opens fine and never produces anything
    pub fn silent() -> Self {
        Script(ScriptKind::Stream {
            chunks: Vec::new(),
            end: StreamEnd::Follow,
        })
    }

    /// A stream that fails to open
    pub fn unreachable(message: impl Into<String>) -> Self {
        Script(ScriptKind::Unreachable(message.into()))
    }

    /// Keep the stream open after the scripted content, like a running container
    pub fn follow(self) -> Self {
        self.ending_with(StreamEnd::Follow)
    }

    /// Fail with a read error after the scripted content
    pub fn fail_with(self, message: impl Into<String>) -> Self {
        self.ending_with(StreamEnd::Error(message.into()))
    }

    fn ending_with(self, end: StreamEnd) -> Self {
        match self.0 {
            ScriptKind::Stream { chunks, .. } => Script(ScriptKind::Stream { chunks, end }),
            unreachable => Script(unreachable),
        }
    }
}

fn scripted_stream(chunks: Vec<Bytes>, end: StreamEnd) -> BoxStream<'static, io::Result<Bytes>> {
    let data = stream::iter(chunks.into_iter().map(Ok));
    match end {
        StreamEnd::Eof => data.boxed(),
        StreamEnd::Follow => data.chain(stream::pending()).boxed(),
        StreamEnd::Error(message) => data
            .chain(stream::once(async move {
                Err(io::Error::new(io::ErrorKind::Other, message))
            }))
            .boxed(),
    }
}

/// One pod with its labels and scripted containers
#[derive(Debug, Clone)]
pub struct MemoryInstance {
    namespace: String,
    name: String,
    labels: BTreeMap<String, String>,
    sub_components: Vec<(String, Script)>,
}

impl MemoryInstance {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            sub_components: Vec::new(),
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn sub_component(mut self, name: impl Into<String>, script: Script) -> Self {
        self.sub_components.push((name.into(), script));
        self
    }

    fn info(&self) -> InstanceInfo {
        InstanceInfo::new(
            self.name.clone(),
            self.sub_components.iter().map(|(name, _)| name.clone()),
        )
    }
}

#[derive(Debug, Default)]
pub struct MemoryProvider {
    instances: Vec<MemoryInstance>,
    discovery_failure: Option<String>,
    discovery_stalls: bool,
    opened: Mutex<Vec<(SourceDescriptor, StreamOptions)>>,
    live: Arc<AtomicUsize>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: MemoryInstance) -> Self {
        self.instances.push(instance);
        self
    }

    /// Make every discovery call fail as if the API server were down
    pub fn failing_discovery(mut self, message: impl Into<String>) -> Self {
        self.discovery_failure = Some(message.into());
        self
    }

    /// Make every discovery call hang forever, like an API server that never answers
    pub fn stalled_discovery(mut self) -> Self {
        self.discovery_stalls = true;
        self
    }

    /// Every open attempt so far, with the options it carried
    pub fn opened(&self) -> Vec<(SourceDescriptor, StreamOptions)> {
        self.opened
            .lock()
            .map(|opened| opened.clone())
            .unwrap_or_default()
    }

    pub fn open_count(&self) -> usize {
        self.opened().len()
    }

    /// Streams handed out and not yet dropped
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    async fn check_discovery(&self) -> Result<(), ProviderError> {
        if self.discovery_stalls {
            futures::future::pending::<()>().await;
        }
        match &self.discovery_failure {
            Some(message) => Err(ProviderError::Unreachable(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LogSourceProvider for MemoryProvider {
    async fn list_instances(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<InstanceInfo>, ProviderError> {
        self.check_discovery().await?;
        Ok(self
            .instances
            .iter()
            .filter(|instance| instance.namespace == namespace && selector.matches(&instance.labels))
            .map(MemoryInstance::info)
            .collect())
    }

    async fn get_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstanceInfo>, ProviderError> {
        self.check_discovery().await?;
        Ok(self
            .instances
            .iter()
            .find(|instance| instance.namespace == namespace && instance.name == name)
            .map(MemoryInstance::info))
    }

    async fn open_log_stream(
        &self,
        source: &SourceDescriptor,
        options: &StreamOptions,
    ) -> Result<LogStream, StreamOpenError> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push((source.clone(), options.clone()));
        }

        let script = self
            .instances
            .iter()
            .filter(|instance| {
                instance.namespace == source.namespace && instance.name == source.instance
            })
            .flat_map(|instance| instance.sub_components.iter())
            .find(|(name, _)| *name == source.sub_component)
            .map(|(_, script)| script.clone())
            .ok_or_else(|| StreamOpenError::NotFound(source.clone()))?;

        match script.0 {
            ScriptKind::Unreachable(message) => Err(StreamOpenError::Unavailable {
                descriptor: source.clone(),
                message,
            }),
            ScriptKind::Stream { chunks, end } => Ok(Box::pin(Tracked {
                inner: StreamReader::new(scripted_stream(chunks, end)),
                _guard: LiveGuard::new(self.live.clone()),
            })),
        }
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reader wrapper that keeps the live-stream count accurate
struct Tracked<R> {
    inner: R,
    _guard: LiveGuard,
}

impl<R: AsyncRead + Unpin> AsyncRead for Tracked<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R: AsyncBufRead + Unpin> AsyncBufRead for Tracked<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(mut self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.inner).consume(amt)
    }
}
