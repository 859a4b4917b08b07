//! Encoding of frames the relay sends to clients.

use crate::codes::{DevIdType, Reason, RelayCmd};
use crate::writer::FrameWriter;

/// What the connect response says about the device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevIdReply {
    /// No usable id; the client should register again.
    None,
    /// The client already holds this relay id.
    Known,
    /// Newly issued relay id the client must remember.
    Assigned(u32),
}

/// Body of a connect or reconnect response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub reconnect: bool,
    pub host_id: u8,
    pub cid: u16,
    pub heartbeat_secs: u16,
    pub n_total: u8,
    pub n_here: u8,
    pub conn_name: String,
    pub devid: DevIdReply,
}

impl ConnectResponse {
    pub fn encode(&self) -> Vec<u8> {
        let cmd = if self.reconnect {
            RelayCmd::ReconnectResp
        } else {
            RelayCmd::ConnectResp
        };
        let w = FrameWriter::new(cmd)
            .u8(self.host_id)
            .u16(self.cid)
            .u16(self.heartbeat_secs)
            .u8(self.n_total)
            .u8(self.n_here)
            .string(&self.conn_name);
        match self.devid {
            DevIdReply::None => w.u8(DevIdType::None.as_u8()),
            DevIdReply::Known => w.u8(DevIdType::Relay.as_u8()).string(""),
            DevIdReply::Assigned(id) => w
                .u8(DevIdType::Relay.as_u8())
                .string(&format_relay_id(id)),
        }
        .finish()
    }
}

/// Relay ids travel as eight upper-case hex digits.
pub fn format_relay_id(id: u32) -> String {
    format!("{id:08X}")
}

pub fn parse_relay_id(s: &str) -> Option<u32> {
    u32::from_str_radix(s, 16).ok()
}

pub fn encode_all_here(host_id: u8, conn_name: &str) -> Vec<u8> {
    FrameWriter::new(RelayCmd::AllHere)
        .u8(host_id)
        .string(conn_name)
        .finish()
}

pub fn encode_disconnect_you(reason: Reason) -> Vec<u8> {
    FrameWriter::new(RelayCmd::DisconnectYou)
        .u8(reason.as_u8())
        .finish()
}

pub fn encode_disconnect_other(reason: Reason, host_id: u8) -> Vec<u8> {
    FrameWriter::new(RelayCmd::DisconnectOther)
        .u8(reason.as_u8())
        .u8(host_id)
        .finish()
}

pub fn encode_denied(reason: Reason) -> Vec<u8> {
    FrameWriter::new(RelayCmd::ConnectDenied)
        .u8(reason.as_u8())
        .finish()
}

pub fn encode_status(reason: Reason) -> Vec<u8> {
    FrameWriter::new(RelayCmd::MsgStatus)
        .u8(reason.as_u8())
        .finish()
}

pub fn encode_have_msgs(token: u32) -> Vec<u8> {
    FrameWriter::new(RelayCmd::HaveMsgs).u32(token).finish()
}

/// Rewrite the leading command byte of a client message so it reads as
/// coming from the relay. Returns `None` for anything that is not a
/// relay-bound message.
pub fn relabel_forward(frame: &[u8]) -> Option<Vec<u8>> {
    let (&first, rest) = frame.split_first()?;
    let cmd = match RelayCmd::from_u8(first)? {
        RelayCmd::MsgToRelay => RelayCmd::MsgFromRelay,
        RelayCmd::MsgToRelayNoConn => RelayCmd::MsgFromRelayNoConn,
        _ => return None,
    };
    let mut out = Vec::with_capacity(frame.len());
    out.push(cmd.as_u8());
    out.extend_from_slice(rest);
    Some(out)
}
