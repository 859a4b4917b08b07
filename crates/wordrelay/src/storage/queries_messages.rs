//! Stored-message queries for the wordrelay server.

use wordrelay_core::db::unix_timestamp;

use super::db::{DatabaseError, RelayDatabase};
use super::models::StoredMessage;
use crate::session::HostId;

impl RelayDatabase {
    // =========================================================================
    // Message store queries
    // =========================================================================

    /// Keep a frame for an absent host. Returns the message id.
    pub async fn store_message(
        &self,
        conn_name: &str,
        hid: HostId,
        payload: &[u8],
    ) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO messages (conn_name, hid, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(conn_name)
        .bind(i64::from(hid))
        .bind(payload)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Oldest message waiting for a host.
    ///
    /// The message is NOT deleted by this call. Use `remove_stored_messages`
    /// once it has been delivered.
    pub async fn get_stored_message(
        &self,
        conn_name: &str,
        hid: HostId,
    ) -> Result<Option<StoredMessage>, DatabaseError> {
        let message = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM messages WHERE conn_name = ? AND hid = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(conn_name)
        .bind(i64::from(hid))
        .fetch_optional(self.pool())
        .await?;

        Ok(message)
    }

    pub async fn remove_stored_messages(&self, ids: &[i64]) -> Result<u64, DatabaseError> {
        let mut removed = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM messages WHERE id = ?")
                .bind(id)
                .execute(self.pool())
                .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    pub async fn count_stored_for_room(&self, conn_name: &str) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conn_name = ?")
            .bind(conn_name)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_stored_for_host(
        &self,
        conn_name: &str,
        hid: HostId,
    ) -> Result<i64, DatabaseError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conn_name = ? AND hid = ?")
                .bind(conn_name)
                .bind(i64::from(hid))
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    /// Messages waiting in any room for slots owned by a device.
    pub async fn count_stored_for_device(&self, devid: u32) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m JOIN hosts h
             ON h.conn_name = m.conn_name AND h.hid = m.hid
             WHERE h.devid = ?",
        )
        .bind(i64::from(devid))
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}
