//! wordrelay Server
//!
//! TCP relay that gathers game devices into rooms and forwards their
//! messages, storing them for hosts that are away.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use wordrelay::manager::SessionRegistry;
use wordrelay::registry::{DeviceDirectory, SocketPool};
use wordrelay::server::{
    ConnectionSettings, RelayServer, spawn_heartbeat_sweep, spawn_status_log,
    spawn_timer_dispatch,
};
use wordrelay::session::RelayContext;
use wordrelay::storage::RelayDatabase;
use wordrelay::timers::TimerService;
use wordrelay_core::config::{database_path, load_config};
use wordrelay_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "wordrelay")]
#[command(version, about = "wordrelay - game room relay server")]
struct Args {
    /// Explicit config file (JSON).
    #[arg(long, env = "WORDRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on. Overrides the config file.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Heartbeat interval advertised to clients, in seconds.
    #[arg(long)]
    heartbeat_secs: Option<u16>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "WORDRELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.listen_addr = addr.to_string();
    }
    if let Some(path) = &args.db_path {
        config.server.database_path = Some(path.clone());
    }
    if let Some(secs) = args.heartbeat_secs {
        config.sessions.heartbeat_secs = secs;
    }

    init_tracing(&format!("wordrelay={}", config.server.log_level), args.log_json);

    let listen_addr: SocketAddr = config.server.listen_addr.parse()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %listen_addr,
        "Starting wordrelay"
    );

    let db_path = match config.server.database_path.clone() {
        Some(path) => path,
        None => database_path().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?,
    };
    info!(path = %db_path.display(), "Opening relay database");
    let db = RelayDatabase::open(&db_path).await?;

    let (timers, fired_rx) = TimerService::new();
    let ctx = RelayContext::new(
        db,
        SocketPool::new(),
        DeviceDirectory::new(),
        timers,
        config.sessions.clone(),
    );
    let registry = Arc::new(SessionRegistry::new(ctx));

    spawn_timer_dispatch(Arc::clone(&registry), fired_rx);
    let sweep = (config.sessions.heartbeat() / 2).max(Duration::from_secs(1));
    spawn_heartbeat_sweep(Arc::clone(&registry), sweep);
    if config.server.status_interval_secs > 0 {
        spawn_status_log(
            Arc::clone(&registry),
            Duration::from_secs(config.server.status_interval_secs),
        );
    }

    let server = Arc::new(RelayServer::new(
        Arc::clone(&registry),
        ConnectionSettings::from_config(&config.server),
    ));

    tokio::select! {
        result = server.bind_and_serve(listen_addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    registry.shutdown_all().await;
    info!("Relay stopped");
    Ok(())
}
