//! WebSocket surface: connection tracking, the upgrade handler, heartbeat
//! pings and the in-process delivery gateway.

pub mod gateway;
mod handler;
mod heartbeat;
pub mod manager;

pub use gateway::WsGateway;
pub use handler::{handle_text, receive_until_expiry, ws_handler, SessionEnd};
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
