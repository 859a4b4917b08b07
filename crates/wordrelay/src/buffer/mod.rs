//! Message buffering for hosts that are not connected.

pub mod manager;

pub use manager::{BufferError, Flushed, MessageBuffer};
