//! In-process progress bus backed by a `tokio::sync::broadcast` channel.
//!
//! Worker progress is fire-and-forget: publishers never wait for delivery,
//! and a slow subscriber loses the oldest notices rather than applying
//! backpressure to the orchestrator.

use tokio::sync::broadcast;
use unplugd_core::job_events::ProgressEvent;
use unplugd_core::types::OwnerId;

// ---------------------------------------------------------------------------
// ProgressNotice
// ---------------------------------------------------------------------------

/// A progress event addressed to the owner of the job.
#[derive(Debug, Clone)]
pub struct ProgressNotice {
    pub owner_id: OwnerId,
    pub event: ProgressEvent,
}

impl ProgressNotice {
    pub fn new(owner_id: impl Into<OwnerId>, event: ProgressEvent) -> Self {
        Self {
            owner_id: owner_id.into(),
            event,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus for [`ProgressNotice`]s.
///
/// Shared via `Arc<EventBus>` between the orchestrator, the internal progress
/// endpoint and the relay.
pub struct EventBus {
    sender: broadcast::Sender<ProgressNotice>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed notices are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a notice to all current subscribers. Never blocks.
    pub fn publish(&self, notice: ProgressNotice) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressNotice> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
