//! Endpoint identity for a connected host.

use std::fmt;

use serde::Serialize;

/// Numeric room id, unique among live sessions.
pub type CookieId = u16;

/// Host slot within a room, `1..=4`; `0` means unassigned.
pub type HostId = u8;

/// Transport handle of one accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnId(pub u64);

/// Routing token issued with a connection; echoed in have-messages notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ClientToken(pub u32);

/// One connected endpoint. Copied and compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Address {
    pub conn: ConnId,
    pub token: ClientToken,
}

impl Address {
    pub const fn new(conn: ConnId, token: ClientToken) -> Self {
        Self { conn, token }
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:08x}", self.conn, self.token.0)
    }
}
