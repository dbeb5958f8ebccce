mod lifecycle;
mod manager;

pub use lifecycle::SessionGuard;
pub use manager::{ManagerError, SessionInfo, SessionManager, SessionManagerConfig};
