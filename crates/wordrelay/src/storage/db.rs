//! `SQLite` database for the wordrelay server.

pub use wordrelay_core::db::DatabaseError;

wordrelay_core::define_database!(RelayDatabase);
