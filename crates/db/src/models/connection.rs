//! Live client connection model.

use serde::Serialize;
use sqlx::FromRow;
use unplugd_core::types::{ConnectionId, OwnerId, Timestamp};

/// A row from the `connections` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub owner_id: OwnerId,
    pub connected_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Connection {
    /// A connection opened now that expires after `ttl`.
    pub fn open(
        connection_id: impl Into<ConnectionId>,
        owner_id: impl Into<OwnerId>,
        ttl: chrono::Duration,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            connection_id: connection_id.into(),
            owner_id: owner_id.into(),
            connected_at: now,
            expires_at: now + ttl,
        }
    }

    /// A connection past `expires_at` is logically dead even if not purged.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}
