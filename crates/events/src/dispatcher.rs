//! Owner-addressed notification fan-out.
//!
//! [`NotificationDispatcher::notify`] looks up every live connection of an
//! owner and pushes the message to each. Any delivery failure removes that
//! connection and delivery continues with the rest. Nothing here ever
//! propagates an error to the caller: the durable effect of a job event is
//! the job record, not the push.

use std::sync::Arc;

use futures::future::join_all;
use unplugd_core::job_events::PushMessage;
use unplugd_db::ConnectionRegistry;

use crate::gateway::ConnectionGateway;

/// Outcome counts of one `notify` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Live connections found for the owner.
    pub attempted: usize,
    pub delivered: usize,
    /// Connections removed after a failed delivery.
    pub pruned: usize,
}

pub struct NotificationDispatcher {
    registry: Arc<dyn ConnectionRegistry>,
    gateway: Arc<dyn ConnectionGateway>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, gateway: Arc<dyn ConnectionGateway>) -> Self {
        Self { registry, gateway }
    }

    /// Push `message` to every live connection of `owner_id`.
    pub async fn notify(&self, owner_id: &str, message: &PushMessage) -> DispatchReport {
        let connection_ids = match self.registry.list_by_owner(owner_id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(owner_id, error = %e, "Failed to look up connections");
                return DispatchReport::default();
            }
        };

        if connection_ids.is_empty() {
            tracing::debug!(
                owner_id,
                job_id = %message.job_id(),
                message_type = message.message_type(),
                "No live connections, notification skipped"
            );
            return DispatchReport::default();
        }

        let payload = match serde_json::to_string(message) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(owner_id, error = %e, "Failed to serialize push message");
                return DispatchReport::default();
            }
        };

        let attempts = connection_ids.iter().map(|id| {
            let payload = payload.as_str();
            async move { (id, self.gateway.post_to_connection(id, payload).await) }
        });
        let results = join_all(attempts).await;

        let mut report = DispatchReport {
            attempted: connection_ids.len(),
            ..Default::default()
        };

        for (connection_id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::info!(
                        owner_id,
                        connection_id = %connection_id,
                        error = %e,
                        "Delivery failed, removing connection"
                    );
                    match self.registry.delete(connection_id).await {
                        Ok(_) => report.pruned += 1,
                        Err(e) => tracing::warn!(
                            connection_id = %connection_id,
                            error = %e,
                            "Failed to remove dead connection"
                        ),
                    }
                }
            }
        }

        tracing::debug!(
            owner_id,
            job_id = %message.job_id(),
            message_type = message.message_type(),
            attempted = report.attempted,
            delivered = report.delivered,
            pruned = report.pruned,
            "Notification dispatched"
        );
        report
    }
}
