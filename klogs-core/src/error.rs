use thiserror::Error;

use crate::source::SourceDescriptor;

/// Failure talking to the log source provider during discovery
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("provider returned malformed data: {0}")]
    Malformed(String),
}

/// Failure opening a single log stream. Only degrades that source.
#[derive(Debug, Clone, Error)]
pub enum StreamOpenError {
    #[error("no such log source: {0}")]
    NotFound(SourceDescriptor),
    #[error("cannot open log stream for {descriptor}: {message}")]
    Unavailable {
        descriptor: SourceDescriptor,
        message: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("no log sources found for {target} in namespace {namespace}")]
    NoSourcesFound { namespace: String, target: String },
    #[error("discovery failed: {0}")]
    Discovery(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to parse request message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Failure on the subscriber channel
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("transport I/O error: {0}")]
    Io(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Errors that end a session before streaming starts. Reported to the subscriber.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl SessionError {
    /// Stable identifier sent as the error `type` in the error payload
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Request(_) => "invalid_request",
            SessionError::Resolve(ResolveError::NoSourcesFound { .. }) => "no_sources_found",
            SessionError::Resolve(ResolveError::Discovery(_)) => "discovery_error",
        }
    }
}
