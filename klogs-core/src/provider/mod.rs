mod memory;

pub use memory::{MemoryInstance, MemoryProvider, Script};

use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncBufRead;

use crate::error::{ProviderError, StreamOpenError};
use crate::source::{LabelSelector, SourceDescriptor, StreamOptions};

/// An open byte stream of one source. Dropping it releases the stream.
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Metadata of one workload instance, as needed for resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub name: String,
    pub sub_components: Vec<String>,
}

impl InstanceInfo {
    pub fn new<S: Into<String>>(name: impl Into<String>, sub_components: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            sub_components: sub_components.into_iter().map(Into::into).collect(),
        }
    }
}

/// Lists workload instances and opens their log streams
#[async_trait]
pub trait LogSourceProvider: Send + Sync {
    /// Instances of `namespace` matching `selector`, in a stable order
    async fn list_instances(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<InstanceInfo>, ProviderError>;

    /// A single instance by name. `Ok(None)` when it does not exist.
    async fn get_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstanceInfo>, ProviderError>;

    async fn open_log_stream(
        &self,
        source: &SourceDescriptor,
        options: &StreamOptions,
    ) -> Result<LogStream, StreamOpenError>;
}
