//! Delivery seam between the dispatcher and live client connections.

use async_trait::async_trait;

/// Error type for a single delivery attempt.
///
/// The dispatcher treats every variant the same way (the connection is
/// pruned); the distinction only matters for logging.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The connection no longer exists at the gateway.
    #[error("Connection gone")]
    Gone,

    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway returned a non-2xx status code.
    #[error("Gateway returned HTTP {0}")]
    HttpStatus(u16),

    /// The local socket's outbound channel is closed.
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Pushes a serialized payload to one connection.
#[async_trait]
pub trait ConnectionGateway: Send + Sync {
    async fn post_to_connection(&self, connection_id: &str, payload: &str) -> Result<(), DeliveryError>;
}
