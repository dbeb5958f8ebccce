//! One subscriber's log streaming session, from request to close.
//!
//! A [`Session`] resolves its sources, starts one tailer per source through
//! the [`Multiplexer`], forwards merged events to the subscriber and watches
//! the inbound side of the connection for a disconnect. Every terminating
//! condition funnels into a single cancellation broadcast.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, TransportError};
use crate::mux::{Multiplexer, MuxConfig};
use crate::protocol::ServerMessage;
use crate::provider::LogSourceProvider;
use crate::resolver::Resolver;
use crate::source::{SelectionRequest, SourceDescriptor};
use crate::tailer::{TailerExit, TailerReport};
use crate::transport::{EventSink, InboundStream};

/// Per-session tuning
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub mux: MuxConfig,
    /// How long draining waits for tailers before aborting them
    pub drain_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mux: MuxConfig::default(),
            drain_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Streaming,
    Draining,
    Closed,
}

impl SessionState {
    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Resolving, Streaming) | (Resolving, Closed) | (Streaming, Draining) | (Draining, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Resolving => "resolving",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The subscriber closed the connection or its read side failed
    SubscriberDisconnected,
    /// Writing to the subscriber failed
    TransportFailed(String),
    /// Every source ended on its own
    SourcesExhausted,
    /// The session was cancelled from outside, e.g. server shutdown
    Cancelled,
    /// The request was invalid or could not be resolved
    Rejected { kind: &'static str, message: String },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::SubscriberDisconnected => f.write_str("subscriber disconnected"),
            CloseReason::TransportFailed(e) => write!(f, "transport failed: {}", e),
            CloseReason::SourcesExhausted => f.write_str("all sources ended"),
            CloseReason::Cancelled => f.write_str("cancelled"),
            CloseReason::Rejected { kind, message } => write!(f, "rejected ({}): {}", kind, message),
        }
    }
}

/// Outcome of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub state: SessionState,
    pub reason: CloseReason,
    pub sources: Vec<SourceDescriptor>,
    pub tailers: Vec<TailerReport>,
    /// Events written to the subscriber
    pub delivered: u64,
}

impl SessionReport {
    /// Sources whose tailer exited with `exit`
    pub fn count_exits(&self, exit: &TailerExit) -> usize {
        self.tailers.iter().filter(|r| &r.exit == exit).count()
    }
}

pub struct Session {
    id: String,
    request: SelectionRequest,
    state: SessionState,
    config: SessionConfig,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(id: impl Into<String>, request: SelectionRequest, config: SessionConfig) -> Self {
        Self::with_cancel(id, request, config, CancellationToken::new())
    }

    /// Create a session that also ends when `cancel` fires
    pub fn with_cancel(
        id: impl Into<String>,
        request: SelectionRequest,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            request,
            state: SessionState::Resolving,
            config,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle to cancel the session from outside. Cancelling is idempotent.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid session transition {} -> {}",
            self.state,
            next
        );
        debug!("[{}] {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    /// Drive the session to completion and close the transport
    pub async fn run<S, I>(
        mut self,
        provider: Arc<dyn LogSourceProvider>,
        mut sink: S,
        inbound: I,
    ) -> SessionReport
    where
        S: EventSink,
        I: InboundStream + 'static,
    {
        info!(
            "[{}] Resolving {} in namespace {}",
            self.id, self.request.target, self.request.namespace
        );
        // the subscriber may leave, or the server may cancel, while discovery is still pending
        let mut watcher = tokio::spawn(watch_inbound(inbound, self.cancel.clone()));
        let resolver = Resolver::new(provider.as_ref());
        let resolved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return self
                    .close_unresolved(CloseReason::Cancelled, &mut sink, Some(watcher))
                    .await;
            }
            disconnect = &mut watcher => {
                log_disconnect(&self.id, disconnect);
                return self
                    .close_unresolved(CloseReason::SubscriberDisconnected, &mut sink, None)
                    .await;
            }
            resolved = resolver.resolve(&self.request) => resolved,
        };
        let sources = match resolved {
            Ok(sources) => sources,
            Err(e) => {
                let error = SessionError::from(e);
                warn!("[{}] {}", self.id, error);
                send_error(&self.id, &mut sink, &error).await;
                let reason = CloseReason::Rejected {
                    kind: error.kind(),
                    message: error.to_string(),
                };
                return self.close_unresolved(reason, &mut sink, Some(watcher)).await;
            }
        };

        self.advance(SessionState::Streaming);
        info!("[{}] Streaming {} source(s)", self.id, sources.len());
        let mut mux = Multiplexer::start(
            sources.clone(),
            self.request.options.clone(),
            provider,
            self.cancel.clone(),
            self.config.mux.clone(),
        );
        let mut watcher_done = false;
        let mut delivered = 0u64;

        let reason = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break CloseReason::Cancelled,
                disconnect = &mut watcher => {
                    watcher_done = true;
                    log_disconnect(&self.id, disconnect);
                    break CloseReason::SubscriberDisconnected;
                }
                event = mux.next() => {
                    let Some(event) = event else {
                        break CloseReason::SourcesExhausted;
                    };
                    // a stalled subscriber must not hide a disconnect or a cancel
                    let sent = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break CloseReason::Cancelled,
                        disconnect = &mut watcher => {
                            watcher_done = true;
                            log_disconnect(&self.id, disconnect);
                            break CloseReason::SubscriberDisconnected;
                        }
                        sent = sink.send(ServerMessage::from(&event)) => sent,
                    };
                    if let Err(e) = sent {
                        error!("[{}] Failed to write to subscriber: {}", self.id, e);
                        break CloseReason::TransportFailed(e.to_string());
                    }
                    delivered += 1;
                }
            }
        };

        self.advance(SessionState::Draining);
        debug!("[{}] Draining: {}", self.id, reason);
        self.cancel.cancel();
        let tailers = mux.shutdown(self.config.drain_grace).await;
        if !watcher_done {
            let _ = watcher.await;
        }
        close_sink(&self.id, &mut sink).await;
        self.advance(SessionState::Closed);

        let failed = tailers
            .iter()
            .filter(|r| matches!(r.exit, TailerExit::OpenFailed(_)))
            .count();
        info!(
            "[{}] Session closed ({}), {} event(s) delivered, {} of {} source(s) failed to open",
            self.id,
            reason,
            delivered,
            failed,
            sources.len()
        );

        SessionReport {
            session_id: self.id,
            state: self.state,
            reason,
            sources,
            tailers,
            delivered,
        }
    }

    /// End a session that never reached `Streaming`. `watcher` is `None`
    /// once it has already been joined.
    async fn close_unresolved<S: EventSink>(
        mut self,
        reason: CloseReason,
        sink: &mut S,
        watcher: Option<JoinHandle<Option<TransportError>>>,
    ) -> SessionReport {
        self.cancel.cancel();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }
        close_sink(&self.id, sink).await;
        self.advance(SessionState::Closed);
        info!("[{}] Session closed before streaming ({})", self.id, reason);
        SessionReport {
            session_id: self.id,
            state: self.state,
            reason,
            sources: Vec::new(),
            tailers: Vec::new(),
            delivered: 0,
        }
    }
}

fn log_disconnect(
    session_id: &str,
    disconnect: Result<Option<TransportError>, tokio::task::JoinError>,
) {
    match disconnect {
        Ok(Some(e)) => debug!("[{}] Inbound read failed: {}", session_id, e),
        Ok(None) => debug!("[{}] Subscriber closed the connection", session_id),
        Err(e) => error!("[{}] Inbound watcher failed: {}", session_id, e),
    }
}

/// Failures are only logged: the subscriber may already be gone.
async fn send_error<S: EventSink>(session_id: &str, sink: &mut S, error: &SessionError) {
    if let Err(e) = sink.send(ServerMessage::Error(error.into())).await {
        debug!("[{}] Could not deliver error to subscriber: {}", session_id, e);
    }
}

async fn close_sink<S: EventSink>(session_id: &str, sink: &mut S) {
    if let Err(e) = sink.close().await {
        debug!("[{}] Error closing transport: {}", session_id, e);
    }
}

/// Waits for the subscriber to go away. Inbound messages only prove the
/// connection is alive and are otherwise ignored. Returns the read error, if any.
async fn watch_inbound<I: InboundStream>(
    mut inbound: I,
    cancel: CancellationToken,
) -> Option<TransportError> {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            message = inbound.recv() => message,
        };
        match message {
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Some(e),
            None => return None,
        }
    }
}

/// Serve one connection: read the subscription request, then run the session.
///
/// A subscriber that leaves before sending its request ends the session
/// quietly; an unparseable request is answered with an `invalid_request` error.
pub async fn serve<S, I>(
    session_id: String,
    provider: Arc<dyn LogSourceProvider>,
    mut sink: S,
    mut inbound: I,
    config: SessionConfig,
    cancel: CancellationToken,
) -> SessionReport
where
    S: EventSink,
    I: InboundStream + 'static,
{
    let first = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        first = inbound.recv() => first,
    };

    let closed_early = |reason: CloseReason| SessionReport {
        session_id: session_id.clone(),
        state: SessionState::Closed,
        reason,
        sources: Vec::new(),
        tailers: Vec::new(),
        delivered: 0,
    };

    let text = match first {
        Some(Ok(text)) => text,
        Some(Err(e)) => {
            debug!("[{}] Connection failed before a request arrived: {}", session_id, e);
            close_sink(&session_id, &mut sink).await;
            return closed_early(CloseReason::SubscriberDisconnected);
        }
        None if cancel.is_cancelled() => {
            close_sink(&session_id, &mut sink).await;
            return closed_early(CloseReason::Cancelled);
        }
        None => {
            debug!("[{}] Subscriber left before sending a request", session_id);
            close_sink(&session_id, &mut sink).await;
            return closed_early(CloseReason::SubscriberDisconnected);
        }
    };

    let request = match SelectionRequest::parse(&text) {
        Ok(request) => request,
        Err(e) => {
            let error = SessionError::from(e);
            warn!("[{}] {}", session_id, error);
            send_error(&session_id, &mut sink, &error).await;
            close_sink(&session_id, &mut sink).await;
            return closed_early(CloseReason::Rejected {
                kind: error.kind(),
                message: error.to_string(),
            });
        }
    };

    Session::with_cancel(session_id.clone(), request, config, cancel)
        .run(provider, sink, inbound)
        .await
}
