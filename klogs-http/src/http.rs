use axum::{
    routing::{delete, get},
    Router,
};
use klogs_core::{LogSourceProvider, MuxConfig};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::apis;
use crate::session::{SessionManager, SessionManagerConfig};

/// Configuration for the HTTP server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0:8000")
    pub address: String,
    /// Session manager configuration
    pub session_manager: SessionManagerConfig,
}

impl ServerConfig {
    /// Create a new server config with the given address and default session manager config
    pub fn new(address: String) -> Self {
        Self {
            address,
            session_manager: SessionManagerConfig::default(),
        }
    }

    /// Set the maximum number of concurrent sessions
    pub fn with_max_sessions(mut self, max_sessions: Option<usize>) -> Self {
        self.session_manager.max_sessions = max_sessions;
        self
    }

    /// Set the per-session tailer pool and merge buffer sizes
    pub fn with_mux(mut self, mux: MuxConfig) -> Self {
        self.session_manager.session.mux = mux;
        self
    }

    /// Set how long a closing session waits for its tailers
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.session_manager.session.drain_grace = grace;
        self
    }
}

/// Server state holding the session manager
#[derive(Clone)]
pub struct ServerState {
    pub session_manager: Arc<SessionManager>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/websocket", get(apis::handle_log_websocket))
        .route("/v1/sessions", get(apis::handle_list_sessions))
        .route("/v1/sessions/{session_id}", delete(apis::handle_cancel_session))
        .route("/healthz", get(apis::handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the log streaming server and run it until Ctrl+C
pub async fn start_server(
    config: ServerConfig,
    provider: Arc<dyn LogSourceProvider>,
) -> anyhow::Result<()> {
    let session_manager = Arc::new(SessionManager::new(
        config.session_manager.clone(),
        provider,
    ));

    match config.session_manager.max_sessions {
        Some(max) => info!("Session manager initialized, max sessions: {}", max),
        None => info!("Session manager initialized, max sessions: unlimited"),
    }
    info!(
        "Per session: {} concurrent tailers, buffer of {} events, {:?} drain grace",
        config.session_manager.session.mux.max_tailers,
        config.session_manager.session.mux.buffer_capacity,
        config.session_manager.session.drain_grace
    );

    let app = router(ServerState {
        session_manager: session_manager.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.address).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);
    info!("  GET    /websocket               - Stream pod logs");
    info!("  GET    /v1/sessions             - List live sessions");
    info!("  DELETE /v1/sessions/:session_id - Cancel a session");

    let shutdown = session_manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            shutdown.shutdown();
        })
        .await?;

    // upgraded websocket connections outlive the HTTP server
    let deadline = session_manager.drain_deadline();
    if session_manager.wait_idle(deadline).await {
        info!("All sessions closed");
    } else {
        warn!(
            "{} session(s) still open after {:?}, exiting anyway",
            session_manager.session_count().await,
            deadline
        );
    }
    Ok(())
}
