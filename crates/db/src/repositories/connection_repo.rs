//! Repository for the `connections` table.

use sqlx::PgPool;
use unplugd_core::types::Timestamp;

use crate::models::connection::Connection;

/// Provides CRUD operations for live client connections.
pub struct ConnectionRepo;

impl ConnectionRepo {
    /// Insert or refresh a connection row.
    pub async fn upsert(pool: &PgPool, connection: &Connection) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO connections (connection_id, owner_id, connected_at, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (connection_id) DO UPDATE \
             SET owner_id = EXCLUDED.owner_id, \
                 connected_at = EXCLUDED.connected_at, \
                 expires_at = EXCLUDED.expires_at",
        )
        .bind(&connection.connection_id)
        .bind(&connection.owner_id)
        .bind(connection.connected_at)
        .bind(connection.expires_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Delete a connection. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, connection_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM connections WHERE connection_id = $1")
            .bind(connection_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// IDs of an owner's connections that have not expired.
    pub async fn list_live_ids_by_owner(
        pool: &PgPool,
        owner_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT connection_id FROM connections \
             WHERE owner_id = $1 AND expires_at > NOW() \
             ORDER BY connected_at",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await
    }

    /// Delete rows whose `expires_at` is at or before `now`. Returns the count.
    pub async fn delete_expired(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM connections WHERE expires_at <= $1")
            .bind(now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
