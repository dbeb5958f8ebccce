use chrono::{DateTime, Utc};
use klogs_core::{EventSink, InboundStream, LogSourceProvider, SessionConfig, SessionReport};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::SessionGuard;

/// Configuration for the session manager
#[derive(Clone, Debug)]
pub struct SessionManagerConfig {
    /// Maximum number of concurrent sessions (None = unlimited)
    pub max_sessions: Option<usize>,
    /// Settings applied to every new session
    pub session: SessionConfig,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: Some(100),
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Maximum number of sessions reached: {0}")]
    TooManySessions(usize),
    #[error("Server is shutting down")]
    ShuttingDown,
}

/// A live session as listed by the API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
}

pub(crate) struct LiveSession {
    pub info: SessionInfo,
    pub cancel: CancellationToken,
}

pub(crate) type SessionMap = Arc<Mutex<HashMap<String, LiveSession>>>;

/// Registry of live log sessions.
/// Admits new sessions up to the configured limit and can cancel any of them,
/// one at a time or all at once on shutdown.
pub struct SessionManager {
    sessions: SessionMap,
    provider: Arc<dyn LogSourceProvider>,
    max_sessions: Option<usize>,
    session_config: SessionConfig,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, provider: Arc<dyn LogSourceProvider>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            provider,
            max_sessions: config.max_sessions,
            session_config: config.session,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reserve a slot for a new session. The slot is freed when the returned
    /// guard is released or dropped.
    pub async fn admit(&self, http_request_id: &str) -> Result<SessionGuard, ManagerError> {
        if self.shutdown.is_cancelled() {
            return Err(ManagerError::ShuttingDown);
        }

        let mut sessions = self.sessions.lock().await;
        if let Some(max) = self.max_sessions {
            if sessions.len() >= max {
                return Err(ManagerError::TooManySessions(max));
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let cancel = self.shutdown.child_token();
        sessions.insert(
            session_id.clone(),
            LiveSession {
                info: SessionInfo {
                    session_id: session_id.clone(),
                    connected_at: Utc::now(),
                },
                cancel: cancel.clone(),
            },
        );
        info!(
            "[{}] - [{}] Session admitted ({} live)",
            http_request_id,
            session_id,
            sessions.len()
        );

        Ok(SessionGuard::new(session_id, cancel, self.sessions.clone()))
    }

    /// Run an admitted session over its connection until it closes
    pub async fn serve<S, I>(&self, guard: SessionGuard, sink: S, inbound: I) -> SessionReport
    where
        S: EventSink,
        I: InboundStream + 'static,
    {
        let report = klogs_core::serve(
            guard.session_id().to_string(),
            self.provider.clone(),
            sink,
            inbound,
            self.session_config.clone(),
            guard.cancel_token(),
        )
        .await;
        guard.release().await;
        report
    }

    /// Cancel a live session. Returns false when no such session exists.
    pub async fn cancel_session(&self, http_request_id: &str, session_id: &str) -> bool {
        match self.sessions.lock().await.get(session_id) {
            Some(session) => {
                info!("[{}] - [{}] Cancelling session", http_request_id, session_id);
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Live sessions, oldest first
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .lock()
            .await
            .values()
            .map(|session| session.info.clone())
            .collect();
        sessions.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        sessions
    }

    /// Get the number of active sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Refuse new sessions and cancel every live one
    pub fn shutdown(&self) {
        info!("Cancelling all sessions");
        self.shutdown.cancel();
    }

    /// Wait until every session has released its slot. Returns false if
    /// some were still live after `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.session_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    /// How long shutdown should wait for sessions to close: one drain grace
    /// period plus a margin for closing the transports.
    pub fn drain_deadline(&self) -> Duration {
        self.session_config.drain_grace + Duration::from_secs(1)
    }
}
