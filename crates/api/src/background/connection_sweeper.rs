//! Periodic purge of expired connection rows.
//!
//! A row normally disappears on disconnect; rows left behind by crashed
//! servers or dropped sockets are removed once past `expires_at`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use unplugd_db::ConnectionRegistry;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(registry: Arc<dyn ConnectionRegistry>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Connection sweeper started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Connection sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                match registry.purge_expired(Utc::now()).await {
                    Ok(0) => tracing::debug!("Connection sweep: nothing expired"),
                    Ok(purged) => tracing::info!(purged, "Connection sweep: purged expired rows"),
                    Err(e) => tracing::error!(error = %e, "Connection sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use unplugd_db::models::connection::Connection;
    use unplugd_db::MemoryConnectionRegistry;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn purges_expired_rows_until_cancelled() {
        let registry = Arc::new(MemoryConnectionRegistry::new());
        registry
            .put(Connection::open("stale", "alice", chrono::Duration::seconds(-1)))
            .await
            .unwrap();
        registry
            .put(Connection::open("live", "alice", chrono::Duration::hours(2)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            registry.clone(),
            Duration::from_secs(300),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!registry.contains("stale").await);
        assert!(registry.contains("live").await);

        cancel.cancel();
        handle.await.unwrap();
    }
}
