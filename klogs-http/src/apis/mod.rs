pub mod logs;
pub mod sessions;

pub use logs::handle_log_websocket;
pub use sessions::{handle_cancel_session, handle_health, handle_list_sessions};
