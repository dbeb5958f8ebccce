use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::manager::SessionMap;

/// Holds a session's slot in the manager.
/// `release` frees the slot once the session has closed. If the guard is
/// dropped instead, e.g. because the WebSocket upgrade never completed, the
/// slot is freed in the background.
pub struct SessionGuard {
    session_id: String,
    cancel: CancellationToken,
    sessions: Option<SessionMap>,
}

impl SessionGuard {
    pub(crate) fn new(session_id: String, cancel: CancellationToken, sessions: SessionMap) -> Self {
        Self {
            session_id,
            cancel,
            sessions: Some(sessions),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn release(mut self) {
        if let Some(sessions) = self.sessions.take() {
            sessions.lock().await.remove(&self.session_id);
            debug!("[] - [{}] Session removed from manager", self.session_id);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(sessions) = self.sessions.take() else {
            return;
        };
        self.cancel.cancel();
        let session_id = std::mem::take(&mut self.session_id);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                sessions.lock().await.remove(&session_id);
                debug!("[] - [{}] Abandoned session removed from manager", session_id);
            });
        }
    }
}
