//! HTTP connection gateway.
//!
//! For deployments where client sockets terminate in a separate gateway
//! process, [`HttpConnectionGateway`] POSTs each payload to
//! `{endpoint}/@connections/{connection_id}`. HTTP 410 means the
//! connection is gone. There is no retry: a failed delivery prunes the
//! connection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::gateway::{ConnectionGateway, DeliveryError};

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpConnectionGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpConnectionGateway {
    /// Create a gateway client for `endpoint` (trailing `/` is ignored).
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn connection_url(&self, connection_id: &str) -> String {
        format!("{}/@connections/{connection_id}", self.endpoint)
    }
}

#[async_trait]
impl ConnectionGateway for HttpConnectionGateway {
    async fn post_to_connection(&self, connection_id: &str, payload: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.connection_url(connection_id))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::GONE => Err(DeliveryError::Gone),
            s => Err(DeliveryError::HttpStatus(s.as_u16())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
