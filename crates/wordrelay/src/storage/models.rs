//! Row types for relay storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Game {
    pub conn_name: String,
    pub cookie: String,
    pub cid: i64,
    pub lang: i64,
    pub n_total: i64,
    pub dead: i64,
    pub created_at: i64,
}

impl Game {
    pub const fn is_dead(&self) -> bool {
        self.dead != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub conn_name: String,
    pub hid: i64,
    pub devid: Option<i64>,
    pub n_players: i64,
    pub seed: i64,
    pub acked: i64,
    pub client_version: i64,
    pub conn_id: Option<i64>,
    pub token: Option<i64>,
    pub last_seen: i64,
    pub bytes_sent: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub id_type: i64,
    pub platform_id: String,
    pub registered_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub conn_name: String,
    pub hid: i64,
    pub payload: Vec<u8>,
    pub created_at: i64,
}

/// Where to reach the device that owns a host slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRoute {
    pub devid: u32,
    pub token: u32,
}
