//! wordrelay Server Library
//!
//! Core functionality for the game relay:
//! - Per-room session state machine (connect, ack, all-here, forward, teardown)
//! - `SQLite` storage for games, host slots, devices, and stored messages
//! - Socket pool, device directory, and one-shot room timers
//! - TCP listener and per-connection frame dispatch

pub mod buffer;
pub mod manager;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod timers;
