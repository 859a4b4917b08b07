//! Latest known channel for each relay device id.
//!
//! Used to tell a device it has stored messages waiting in a room it is not
//! currently connected to.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::session::{Address, ConnId};

#[derive(Clone, Default)]
pub struct DeviceDirectory {
    devices: Arc<RwLock<HashMap<u32, Address>>>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn remember(&self, devid: u32, addr: Address) {
        self.devices.write().await.insert(devid, addr);
        debug!(devid = format_args!("{devid:08X}"), addr = %addr, "Device channel noted");
    }

    pub async fn get(&self, devid: u32) -> Option<Address> {
        self.devices.read().await.get(&devid).copied()
    }

    /// Drop every device reached through a closed connection.
    pub async fn forget_conn(&self, conn: ConnId) -> usize {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|_, addr| addr.conn != conn);
        before - devices.len()
    }
}
