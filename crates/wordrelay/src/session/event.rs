//! Events queued on a session and drained by its state machine.

use std::fmt;

use wordrelay_proto::{DevId, Reason};

use super::address::{Address, HostId};

/// Everything a connect or reconnect carries into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinArgs {
    pub addr: Address,
    /// Slot claimed on reconnect; `0` on a fresh connect.
    pub host: HostId,
    /// Players this device brings.
    pub n_here: u8,
    /// Players the room seeks in total.
    pub n_total: u8,
    pub seed: u16,
    pub lang: u8,
    pub client_version: u16,
    pub devid: Option<DevId>,
}

/// A game message on its way between two hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageArgs {
    pub addr: Address,
    pub src: HostId,
    pub dest: HostId,
    pub frame: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    DeviceConnect(JoinArgs),
    DeviceReconnect(JoinArgs),
    AckReceived { host: HostId, addr: Address },
    AckTimeout { host: HostId },
    ForwardMessage(MessageArgs),
    ProxyMessage(MessageArgs),
    Disconnect { addr: Address, host: HostId },
    DeviceGone { host: HostId, seed: u16 },
    HeartbeatReceived { host: HostId, addr: Address },
    HeartbeatFailed { addr: Address },
    RemoveSocket { addr: Address },
    Shutdown,
    AllConnectedTimer,
    RoomFull,
    RoomShort,
    AllHere,
    NoMoreSockets,
    NoMoreMessages,
    NotifyDisconnect { addr: Address, reason: Reason },
    TryTell { addr: Address, token: u32 },
    GameDead { addr: Address },
}

/// Payload-free tag of a [`SessionEvent`], the input of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceConnect,
    DeviceReconnect,
    AckReceived,
    AckTimeout,
    ForwardMessage,
    ProxyMessage,
    Disconnect,
    DeviceGone,
    HeartbeatReceived,
    HeartbeatFailed,
    RemoveSocket,
    Shutdown,
    AllConnectedTimer,
    RoomFull,
    RoomShort,
    AllHere,
    NoMoreSockets,
    NoMoreMessages,
    NotifyDisconnect,
    TryTell,
    GameDead,
}

impl SessionEvent {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::DeviceConnect(_) => EventKind::DeviceConnect,
            Self::DeviceReconnect(_) => EventKind::DeviceReconnect,
            Self::AckReceived { .. } => EventKind::AckReceived,
            Self::AckTimeout { .. } => EventKind::AckTimeout,
            Self::ForwardMessage(_) => EventKind::ForwardMessage,
            Self::ProxyMessage(_) => EventKind::ProxyMessage,
            Self::Disconnect { .. } => EventKind::Disconnect,
            Self::DeviceGone { .. } => EventKind::DeviceGone,
            Self::HeartbeatReceived { .. } => EventKind::HeartbeatReceived,
            Self::HeartbeatFailed { .. } => EventKind::HeartbeatFailed,
            Self::RemoveSocket { .. } => EventKind::RemoveSocket,
            Self::Shutdown => EventKind::Shutdown,
            Self::AllConnectedTimer => EventKind::AllConnectedTimer,
            Self::RoomFull => EventKind::RoomFull,
            Self::RoomShort => EventKind::RoomShort,
            Self::AllHere => EventKind::AllHere,
            Self::NoMoreSockets => EventKind::NoMoreSockets,
            Self::NoMoreMessages => EventKind::NoMoreMessages,
            Self::NotifyDisconnect { .. } => EventKind::NotifyDisconnect,
            Self::TryTell { .. } => EventKind::TryTell,
            Self::GameDead { .. } => EventKind::GameDead,
        }
    }

    /// Endpoint the event concerns, if any.
    pub const fn addr(&self) -> Option<Address> {
        match self {
            Self::DeviceConnect(args) | Self::DeviceReconnect(args) => Some(args.addr),
            Self::ForwardMessage(msg) | Self::ProxyMessage(msg) => Some(msg.addr),
            Self::AckReceived { addr, .. }
            | Self::Disconnect { addr, .. }
            | Self::HeartbeatReceived { addr, .. }
            | Self::HeartbeatFailed { addr }
            | Self::RemoveSocket { addr }
            | Self::NotifyDisconnect { addr, .. }
            | Self::TryTell { addr, .. }
            | Self::GameDead { addr } => Some(*addr),
            Self::AckTimeout { .. }
            | Self::DeviceGone { .. }
            | Self::Shutdown
            | Self::AllConnectedTimer
            | Self::RoomFull
            | Self::RoomShort
            | Self::AllHere
            | Self::NoMoreSockets
            | Self::NoMoreMessages => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
