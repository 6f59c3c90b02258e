//! Background relay from the progress bus to client connections.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use unplugd_core::job_events::PushMessage;

use crate::bus::ProgressNotice;
use crate::dispatcher::NotificationDispatcher;

/// Forwards every [`ProgressNotice`] to the owner's connections.
pub struct ProgressRelay;

impl ProgressRelay {
    /// Run the relay loop.
    ///
    /// Exits when `cancel` fires or the bus is dropped. Lagged notices are
    /// skipped: progress is best-effort.
    pub async fn run(
        dispatcher: Arc<NotificationDispatcher>,
        mut receiver: broadcast::Receiver<ProgressNotice>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Progress relay started");
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Progress relay stopping");
                    break;
                }
                received = receiver.recv() => received,
            };

            match received {
                Ok(notice) => {
                    let message = PushMessage::from(notice.event);
                    dispatcher.notify(&notice.owner_id, &message).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Progress relay lagged, notices dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Progress bus closed, relay shutting down");
                    break;
                }
            }
        }
    }
}
