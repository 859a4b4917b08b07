//! One client socket.
//!
//! A connection is split in two: a writer task that drains the outbound
//! queue registered with the [`SocketPool`](crate::registry::SocketPool),
//! and a reader loop that decodes frames and calls into the registry. The
//! reader stops when the peer goes away, on a malformed frame, or when the
//! relay closes the socket through the pool.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use wordrelay_core::config::ServerConfig;
use wordrelay_proto::codes::{MAX_HOSTS, PROTO_VERSION};
use wordrelay_proto::framing::{read_frame, write_frame};
use wordrelay_proto::outbound::encode_denied;
use wordrelay_proto::{ClientFrame, JoinRequest, ProtoError, Reason};

use crate::manager::{RegistryError, SessionRegistry};
use crate::session::Address;

/// Per-connection limits taken from [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_frame_bytes: usize,
    pub send_queue_depth: usize,
}

impl ConnectionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            send_queue_depth: config.send_queue_depth.max(1),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

#[derive(Debug, thiserror::Error)]
enum FrameError {
    #[error("Malformed frame: {0}")]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub(super) async fn run(
    registry: Arc<SessionRegistry>,
    stream: TcpStream,
    addr: Address,
    peer: SocketAddr,
    settings: ConnectionSettings,
) {
    let (reader, writer) = stream.into_split();
    serve_stream(registry, reader, writer, addr, settings).await;
    info!(peer = %peer, addr = %addr, "Client disconnected");
}

/// Serve one connection until either side closes it.
#[instrument(skip_all, fields(addr = %addr))]
pub(super) async fn serve_stream<R, W>(
    registry: Arc<SessionRegistry>,
    mut reader: R,
    mut writer: W,
    addr: Address,
    settings: ConnectionSettings,
) where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let ctx = registry.context();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(settings.send_queue_depth);
    let closed = ctx.sockets.register(addr.conn, frame_tx).await;

    // Ends once the pool drops the sender, after writing whatever was queued.
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!(error = %e, "Write failed");
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        let frame = tokio::select! {
            biased;
            () = closed.notified() => {
                debug!("Closed by relay");
                break;
            }
            read = read_frame(&mut reader, settings.max_frame_bytes) => match read {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Peer closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Read failed");
                    break;
                }
            },
        };

        match dispatch(&registry, addr, &frame).await {
            Ok(()) => {}
            Err(FrameError::Proto(e)) => {
                warn!(error = %e, len = frame.len(), "Dropping client after bad frame");
                break;
            }
            Err(FrameError::Registry(e)) => log_registry_error(&e),
        }
    }

    if let Err(e) = registry.socket_closed(addr).await {
        error!(error = %e, "Failed to remove closed socket from its room");
    }
    let forgotten = ctx.devices.forget_conn(addr.conn).await;
    if forgotten > 0 {
        debug!(forgotten, "Device channels forgotten");
    }
    ctx.sockets.unregister(addr.conn).await;

    if let Err(e) = writer_task.await {
        warn!(error = %e, "Writer task failed");
    }
}

async fn dispatch(registry: &SessionRegistry, addr: Address, frame: &[u8]) -> Result<(), FrameError> {
    match ClientFrame::decode(frame)? {
        ClientFrame::Connect(join) => {
            if let Some(reason) = join_problem(&join) {
                refuse(registry, addr, reason).await;
                return Ok(());
            }
            registry.connect(&join, addr).await?;
        }
        ClientFrame::Reconnect(rejoin) => {
            if let Some(reason) = join_problem(&rejoin.join) {
                refuse(registry, addr, reason).await;
                return Ok(());
            }
            registry.reconnect(&rejoin, addr).await?;
        }
        ClientFrame::Ack { host_id } => registry.handle_ack(addr, host_id).await?,
        ClientFrame::Disconnect { cid, host_id } => registry.disconnect(cid, host_id, addr).await?,
        ClientFrame::Heartbeat { cid, host_id } => registry.heartbeat(cid, host_id, addr).await?,
        ClientFrame::Message {
            cid,
            src,
            dest,
            frame,
        } => registry.put_message(cid, addr, src, dest, frame).await?,
        ClientFrame::MessageNoConn {
            conn_name,
            src,
            dest,
            frame,
        } => registry.forward(&conn_name, addr, src, dest, frame).await?,
        ClientFrame::DeviceGone {
            conn_name,
            host_id,
            seed,
        } => registry.device_gone(&conn_name, host_id, seed).await?,
    }
    Ok(())
}

/// Reason to turn a join away before it reaches a room.
fn join_problem(join: &JoinRequest) -> Option<Reason> {
    if join.proto != PROTO_VERSION {
        info!(proto = join.proto, "Client speaks another protocol version");
        return Some(Reason::BadProto);
    }
    let counts_ok = join.n_here > 0
        && join.n_here <= join.n_total
        && usize::from(join.n_total) <= MAX_HOSTS;
    if !counts_ok {
        info!(n_here = join.n_here, n_total = join.n_total, "Impossible player counts");
        return Some(Reason::BadProto);
    }
    None
}

async fn refuse(registry: &SessionRegistry, addr: Address, reason: Reason) {
    let sockets = &registry.context().sockets;
    sockets.send(addr, &encode_denied(reason)).await;
    sockets.close(addr).await;
}

fn log_registry_error(e: &RegistryError) {
    match e {
        RegistryError::UnknownRoom(_)
        | RegistryError::UnknownGame(_)
        | RegistryError::UnknownSocket(_)
        | RegistryError::Gone(_) => debug!(error = %e, "Frame for a room that is not here"),
        RegistryError::Session(_) | RegistryError::Database(_) => {
            error!(error = %e, "Frame handling failed");
        }
    }
}
