//! In-memory pool of open client sockets.
//!
//! Each accepted connection registers its outbound queue here. Sessions send
//! through the pool and ask it to close sockets; the connection task owns the
//! actual stream and notices the close through its [`Notify`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::session::{Address, ConnId};

struct SocketEntry {
    frame_tx: mpsc::Sender<Vec<u8>>,
    closed: Arc<Notify>,
}

/// Thread-safe pool of open sockets keyed by transport handle.
#[derive(Clone)]
pub struct SocketPool {
    sockets: Arc<RwLock<HashMap<ConnId, SocketEntry>>>,
}

impl SocketPool {
    pub fn new() -> Self {
        Self {
            sockets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a socket's outbound queue. The returned notifier fires when
    /// the pool closes the socket.
    pub async fn register(&self, conn: ConnId, frame_tx: mpsc::Sender<Vec<u8>>) -> Arc<Notify> {
        let closed = Arc::new(Notify::new());
        self.sockets.write().await.insert(
            conn,
            SocketEntry {
                frame_tx,
                closed: Arc::clone(&closed),
            },
        );
        debug!(conn = %conn, "Socket registered");
        closed
    }

    /// Queue a frame. A closed socket or a full queue is a failed send.
    pub async fn send(&self, addr: Address, frame: &[u8]) -> bool {
        let sockets = self.sockets.read().await;
        let Some(entry) = sockets.get(&addr.conn) else {
            debug!(conn = %addr.conn, "Send to unknown socket");
            return false;
        };
        match entry.frame_tx.try_send(frame.to_vec()) {
            Ok(()) => true,
            Err(e) => {
                warn!(conn = %addr.conn, error = %e, "Send to socket failed");
                false
            }
        }
    }

    /// Close a socket. Frames already queued are still written. Closing an
    /// unknown or already-closed socket is a no-op that returns `false`.
    pub async fn close(&self, addr: Address) -> bool {
        let entry = self.sockets.write().await.remove(&addr.conn);
        match entry {
            Some(entry) => {
                entry.closed.notify_one();
                info!(conn = %addr.conn, "Socket closed");
                true
            }
            None => false,
        }
    }

    /// Forget a socket whose connection already ended.
    pub async fn unregister(&self, conn: ConnId) {
        self.sockets.write().await.remove(&conn);
    }

    pub async fn is_open(&self, conn: ConnId) -> bool {
        self.sockets.read().await.contains_key(&conn)
    }

    pub async fn count(&self) -> usize {
        self.sockets.read().await.len()
    }
}

impl Default for SocketPool {
    fn default() -> Self {
        Self::new()
    }
}
