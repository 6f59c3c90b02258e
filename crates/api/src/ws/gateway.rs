//! Delivery to sockets held by this process.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message;
use unplugd_events::{ConnectionGateway, DeliveryError};

use crate::ws::manager::WsManager;

/// [`ConnectionGateway`] backed by the local [`WsManager`].
///
/// A connection this process does not hold is reported as
/// [`DeliveryError::Gone`], so the dispatcher prunes its row. That is only
/// sound when this process holds every live connection; startup refuses a
/// shared registry without an external gateway unless `SINGLE_REPLICA` is
/// set.
pub struct WsGateway {
    ws_manager: Arc<WsManager>,
}

impl WsGateway {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }
}

#[async_trait]
impl ConnectionGateway for WsGateway {
    async fn post_to_connection(&self, connection_id: &str, payload: &str) -> Result<(), DeliveryError> {
        if self.ws_manager.owner_of(connection_id).await.is_none() {
            return Err(DeliveryError::Gone);
        }
        let message = Message::Text(payload.to_string().into());
        if self.ws_manager.send(connection_id, message).await {
            Ok(())
        } else {
            Err(DeliveryError::Closed(connection_id.to_string()))
        }
    }
}
