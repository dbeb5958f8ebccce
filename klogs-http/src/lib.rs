pub mod apis;
pub mod error;
pub mod http;
pub mod session;
pub mod ws;

pub use error::ErrorResponse;
pub use http::{router, start_server, ServerConfig, ServerState};
pub use session::{ManagerError, SessionGuard, SessionInfo, SessionManager, SessionManagerConfig};
