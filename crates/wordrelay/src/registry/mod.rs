//! In-memory registries for open sockets and device channels.

pub mod devices;
pub mod sockets;

pub use devices::DeviceDirectory;
pub use sockets::SocketPool;
