//! Command, reason and device-id codes shared by the relay and its clients.

/// Largest number of hosts a single room can hold.
pub const MAX_HOSTS: usize = 4;

/// Host id meaning "not yet assigned".
pub const HOST_ID_NONE: u8 = 0;

/// Longest connection name the relay hands out (exclusive bound, like the
/// client's buffer).
pub const MAX_CONNNAME_LEN: usize = 40;

/// Longest invite cookie accepted from a client.
pub const MAX_COOKIE_LEN: usize = 32;

/// Longest device id string accepted from a client.
pub const MAX_DEVID_LEN: usize = 64;

/// Largest frame the relay will read, length prefix excluded.
pub const MAX_FRAME_LEN: usize = 4096;

/// Protocol version the relay speaks.
pub const PROTO_VERSION: u8 = 0x04;

/// Relay command byte, the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RelayCmd {
    None = 0,
    GameConnect = 1,
    GameReconnect = 2,
    GameDisconnect = 3,
    ConnectResp = 4,
    ReconnectResp = 5,
    AllHere = 6,
    DisconnectYou = 7,
    DisconnectOther = 8,
    ConnectDenied = 9,
    Heartbeat = 10,
    MsgFromRelay = 11,
    MsgToRelay = 12,
    MsgStatus = 13,
    Ack = 14,
    MsgFromRelayNoConn = 15,
    MsgToRelayNoConn = 16,
    HaveMsgs = 17,
    DeviceGone = 18,
}

impl RelayCmd {
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::None,
            1 => Self::GameConnect,
            2 => Self::GameReconnect,
            3 => Self::GameDisconnect,
            4 => Self::ConnectResp,
            5 => Self::ReconnectResp,
            6 => Self::AllHere,
            7 => Self::DisconnectYou,
            8 => Self::DisconnectOther,
            9 => Self::ConnectDenied,
            10 => Self::Heartbeat,
            11 => Self::MsgFromRelay,
            12 => Self::MsgToRelay,
            13 => Self::MsgStatus,
            14 => Self::Ack,
            15 => Self::MsgFromRelayNoConn,
            16 => Self::MsgToRelayNoConn,
            17 => Self::HaveMsgs,
            18 => Self::DeviceGone,
            _ => return None,
        })
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Reason code carried by denials, disconnect notices and status frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reason {
    None = 0,
    OldFlags = 1,
    BadProto = 2,
    RelayBusy = 3,
    Shutdown = 4,
    Timeout = 5,
    HeartYou = 6,
    HeartOther = 7,
    LostOther = 8,
    OtherDiscon = 9,
    NoRoom = 10,
    DupRoom = 11,
    TooMany = 12,
    Deleted = 13,
    NoReconnect = 14,
    DeadGame = 15,
}

impl Reason {
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::None,
            1 => Self::OldFlags,
            2 => Self::BadProto,
            3 => Self::RelayBusy,
            4 => Self::Shutdown,
            5 => Self::Timeout,
            6 => Self::HeartYou,
            7 => Self::HeartOther,
            8 => Self::LostOther,
            9 => Self::OtherDiscon,
            10 => Self::NoRoom,
            11 => Self::DupRoom,
            12 => Self::TooMany,
            13 => Self::Deleted,
            14 => Self::NoReconnect,
            15 => Self::DeadGame,
            _ => return None,
        })
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Kind of device id a client presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DevIdType {
    None = 0,
    /// Id previously issued by this relay (8 hex digits).
    Relay = 1,
    Linux = 2,
    AndroidGcm = 3,
}

impl DevIdType {
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::None,
            1 => Self::Relay,
            2 => Self::Linux,
            3 => Self::AndroidGcm,
            _ => return None,
        })
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Platform ids get registered and answered with a fresh relay id.
    pub const fn is_platform(self) -> bool {
        matches!(self, Self::Linux | Self::AndroidGcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes_are_stable() {
        for byte in 0..=18u8 {
            let cmd = RelayCmd::from_u8(byte);
            assert_eq!(cmd.map(RelayCmd::as_u8), Some(byte));
        }
        assert_eq!(RelayCmd::from_u8(19), None);
        assert_eq!(RelayCmd::MsgToRelayNoConn.as_u8(), 16);
    }

    #[test]
    fn reasons_cover_full_range() {
        assert_eq!(Reason::from_u8(14), Some(Reason::NoReconnect));
        assert_eq!(Reason::from_u8(16), None);
        assert_eq!(Reason::TooMany.as_u8(), 12);
    }

    #[test]
    fn platform_ids() {
        assert!(DevIdType::AndroidGcm.is_platform());
        assert!(!DevIdType::Relay.is_platform());
        assert!(!DevIdType::None.is_platform());
        assert_eq!(DevIdType::from_u8(9), None);
    }
}
