//! Accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tracing::{info, warn};

use super::connection::{self, ConnectionSettings};
use crate::manager::SessionRegistry;
use crate::session::{Address, ClientToken, ConnId};

pub struct RelayServer {
    registry: Arc<SessionRegistry>,
    settings: ConnectionSettings,
    next_conn: AtomicU64,
}

impl RelayServer {
    pub fn new(registry: Arc<SessionRegistry>, settings: ConnectionSettings) -> Self {
        Self {
            registry,
            settings,
            next_conn: AtomicU64::new(1),
        }
    }

    /// Bind `addr` and serve until the task is dropped.
    pub async fn bind_and_serve(self: Arc<Self>, addr: SocketAddr) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Relay listening");
        self.serve(listener).await
    }

    /// Serve an already-bound listener. Each accepted socket gets its own
    /// task and a fresh [`Address`].
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let addr = self.next_address();
            info!(peer = %peer, addr = %addr, "Client connected");

            let registry = Arc::clone(&self.registry);
            let settings = self.settings.clone();
            tokio::spawn(async move {
                connection::run(registry, stream, addr, peer, settings).await;
            });
        }
    }

    fn next_address(&self) -> Address {
        let conn = ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        let token = ClientToken(uuid::Uuid::new_v4().as_fields().0);
        Address::new(conn, token)
    }
}
