//! `SQLite` storage for the wordrelay server.
//!
//! The store is the source of truth for rooms, host slots, player counts,
//! ack state, device registrations and messages waiting for absent hosts.

mod db;
mod models;
mod queries;
mod queries_messages;

#[cfg(test)]
mod tests;

pub use db::{DatabaseError, RelayDatabase};
pub use models::*;
pub use queries::NewHost;
