use std::sync::Arc;

use unplugd_db::{ConnectionRegistry, DbPool};
use unplugd_events::EventBus;
use unplugd_pipeline::JobService;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Postgres pool, or `None` when running on the in-memory stores.
    pub pool: Option<DbPool>,
    /// Job intake, read model and orchestration starts.
    pub jobs: Arc<JobService>,
    /// Connection rows written on connect and removed on disconnect.
    pub connections: Arc<dyn ConnectionRegistry>,
    /// WebSocket connections held by this process.
    pub ws_manager: Arc<WsManager>,
    /// Progress bus fed by the internal progress endpoint.
    pub event_bus: Arc<EventBus>,
}
