//! Background tasks: timer dispatch, heartbeat sweeps, status logging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::SessionRegistry;
use crate::timers::FiredTimer;

/// Deliver fired timers to their rooms. Ends when every [`TimerService`]
/// clone is gone.
///
/// [`TimerService`]: crate::timers::TimerService
pub fn spawn_timer_dispatch(
    registry: Arc<SessionRegistry>,
    mut fired_rx: mpsc::UnboundedReceiver<FiredTimer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(fired) = fired_rx.recv().await {
            debug!(cid = fired.key.cid, kind = ?fired.key.kind, "Timer fired");
            if let Err(e) = registry.on_timer(fired).await {
                warn!(cid = fired.key.cid, error = %e, "Timer handling failed");
            }
        }
        debug!("Timer dispatch stopped");
    })
}

/// Check every room for silent hosts once per `period`.
pub fn spawn_heartbeat_sweep(registry: Arc<SessionRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            registry.check_heartbeats(Instant::now()).await;
        }
    })
}

/// Log a one-line summary of every room once per `period`.
pub fn spawn_status_log(registry: Arc<SessionRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshots = registry.snapshots(Instant::now()).await;
            let sockets = registry.context().sockets.count().await;
            let live = snapshots.iter().filter(|s| s.state.is_live()).count();
            let stored: i64 = snapshots.iter().map(|s| s.stored_messages).sum();
            info!(rooms = snapshots.len(), live, sockets, stored, "Relay status");
            for snap in &snapshots {
                match serde_json::to_string(snap) {
                    Ok(json) => debug!(cid = snap.cid, room = %json, "Room status"),
                    Err(e) => warn!(cid = snap.cid, error = %e, "Failed to serialize room status"),
                }
            }
        }
    })
}
