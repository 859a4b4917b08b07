//! TCP front end for the relay.
//!
//! The listener accepts client sockets, each connection task turns the
//! frames it reads into [`SessionRegistry`](crate::manager::SessionRegistry)
//! calls, and the sweeper runs timers and periodic checks.

mod connection;
mod listener;
mod sweeper;


pub use connection::ConnectionSettings;
pub use listener::RelayServer;
pub use sweeper::{spawn_heartbeat_sweep, spawn_status_log, spawn_timer_dispatch};
