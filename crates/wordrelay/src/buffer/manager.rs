//! Store-and-forward buffer for hosts that are not connected.
//!
//! Frames for an absent host are stored in the database. When the host is
//! reachable again the backlog is flushed oldest first; each message is
//! deleted only after its send succeeded.

use tracing::{debug, info, warn};

use crate::registry::SocketPool;
use crate::session::{Address, HostId};
use crate::storage::{DatabaseError, RelayDatabase};

/// Result of flushing one host's backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flushed {
    pub sent: u64,
    /// A send failed; the failed message and the rest stay stored.
    pub send_failed: bool,
}

#[derive(Clone)]
pub struct MessageBuffer {
    db: RelayDatabase,
    sockets: SocketPool,
}

impl MessageBuffer {
    pub const fn new(db: RelayDatabase, sockets: SocketPool) -> Self {
        Self { db, sockets }
    }

    /// Keep a frame for `hid` until it reconnects.
    pub async fn store(
        &self,
        conn_name: &str,
        hid: HostId,
        frame: &[u8],
    ) -> Result<i64, BufferError> {
        let id = self.db.store_message(conn_name, hid, frame).await?;
        debug!(
            conn_name = %conn_name,
            host_id = hid,
            msg_id = id,
            len = frame.len(),
            "Message stored for absent host"
        );
        Ok(id)
    }

    /// Send everything stored for `hid` to `addr`.
    pub async fn flush(
        &self,
        conn_name: &str,
        hid: HostId,
        addr: Address,
    ) -> Result<Flushed, BufferError> {
        let mut flushed = Flushed::default();

        while let Some(msg) = self.db.get_stored_message(conn_name, hid).await? {
            if !self.sockets.send(addr, &msg.payload).await {
                warn!(
                    conn_name = %conn_name,
                    host_id = hid,
                    msg_id = msg.id,
                    sent = flushed.sent,
                    "Failed to send stored message, remaining messages preserved in DB"
                );
                flushed.send_failed = true;
                break;
            }
            self.db.record_sent(conn_name, hid, msg.payload.len()).await?;
            // Delete from DB only after successful send
            self.db.remove_stored_messages(&[msg.id]).await?;
            flushed.sent += 1;
        }

        if flushed.sent > 0 {
            info!(
                conn_name = %conn_name,
                host_id = hid,
                count = flushed.sent,
                "Stored messages delivered"
            );
        }
        Ok(flushed)
    }

    pub async fn count_for_room(&self, conn_name: &str) -> Result<i64, BufferError> {
        Ok(self.db.count_stored_for_room(conn_name).await?)
    }

    pub async fn count_for_host(&self, conn_name: &str, hid: HostId) -> Result<i64, BufferError> {
        Ok(self.db.count_stored_for_host(conn_name, hid).await?)
    }

    pub async fn count_for_device(&self, devid: u32) -> Result<i64, BufferError> {
        Ok(self.db.count_stored_for_device(devid).await?)
    }
}

/// Buffer operation errors.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}
