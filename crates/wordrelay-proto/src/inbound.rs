//! Decoding of frames sent by clients to the relay.

use crate::codes::{
    DevIdType, MAX_CONNNAME_LEN, MAX_COOKIE_LEN, MAX_DEVID_LEN, RelayCmd,
};
use crate::error::ProtoError;
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// Device identity presented on connect or reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevId {
    pub kind: DevIdType,
    pub id: String,
}

/// Fields shared by connect and reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub proto: u8,
    pub client_version: u16,
    pub cookie: String,
    pub seeks_public: bool,
    pub advertise: bool,
    pub n_here: u8,
    pub n_total: u8,
    pub seed: u16,
    pub lang: u8,
    pub devid: Option<DevId>,
}

/// A reconnect names the host slot and room it held before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejoinRequest {
    pub join: JoinRequest,
    pub host_id: u8,
    pub conn_name: String,
}

/// Every frame a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Connect(JoinRequest),
    Reconnect(RejoinRequest),
    Ack {
        host_id: u8,
    },
    Disconnect {
        cid: u16,
        host_id: u8,
    },
    Heartbeat {
        cid: u16,
        host_id: u8,
    },
    /// In-room message; `frame` is the complete frame as received.
    Message {
        cid: u16,
        src: u8,
        dest: u8,
        frame: Vec<u8>,
    },
    /// Message addressed by connection name. `frame` is rebuilt without the
    /// name as `[cmd, src, dest, payload..]`.
    MessageNoConn {
        conn_name: String,
        src: u8,
        dest: u8,
        frame: Vec<u8>,
    },
    DeviceGone {
        conn_name: String,
        host_id: u8,
        seed: u16,
    },
}

impl ClientFrame {
    pub fn decode(frame: &[u8]) -> Result<Self, ProtoError> {
        let mut r = FrameReader::new(frame);
        let byte = r.u8().map_err(|_| ProtoError::Empty)?;
        let cmd = RelayCmd::from_u8(byte).ok_or(ProtoError::UnknownCommand(byte))?;

        match cmd {
            RelayCmd::GameConnect => {
                let head = JoinHead::read(&mut r)?;
                let n_here = r.u8()?;
                let n_total = r.u8()?;
                let seed = r.u16()?;
                let lang = r.u8()?;
                let devid = read_devid(&mut r)?;
                Ok(Self::Connect(head.into_join(n_here, n_total, seed, lang, devid)))
            }
            RelayCmd::GameReconnect => {
                let head = JoinHead::read(&mut r)?;
                let host_id = r.u8()?;
                let n_here = r.u8()?;
                let n_total = r.u8()?;
                let seed = r.u16()?;
                let lang = r.u8()?;
                let conn_name = r.string(MAX_CONNNAME_LEN)?;
                let devid = read_devid(&mut r)?;
                Ok(Self::Reconnect(RejoinRequest {
                    join: head.into_join(n_here, n_total, seed, lang, devid),
                    host_id,
                    conn_name,
                }))
            }
            RelayCmd::Ack => Ok(Self::Ack { host_id: r.u8()? }),
            RelayCmd::GameDisconnect => Ok(Self::Disconnect {
                cid: r.u16()?,
                host_id: r.u8()?,
            }),
            RelayCmd::Heartbeat => Ok(Self::Heartbeat {
                cid: r.u16()?,
                host_id: r.u8()?,
            }),
            RelayCmd::MsgToRelay => {
                let cid = r.u16()?;
                let src = r.u8()?;
                let dest = r.u8()?;
                Ok(Self::Message {
                    cid,
                    src,
                    dest,
                    frame: frame.to_vec(),
                })
            }
            RelayCmd::MsgToRelayNoConn => {
                let conn_name = r.string(MAX_CONNNAME_LEN)?;
                let src = r.u8()?;
                let dest = r.u8()?;
                let frame = FrameWriter::new(RelayCmd::MsgToRelayNoConn)
                    .u8(src)
                    .u8(dest)
                    .bytes(r.rest())
                    .finish();
                Ok(Self::MessageNoConn {
                    conn_name,
                    src,
                    dest,
                    frame,
                })
            }
            RelayCmd::DeviceGone => Ok(Self::DeviceGone {
                conn_name: r.string(MAX_CONNNAME_LEN)?,
                host_id: r.u8()?,
                seed: r.u16()?,
            }),
            other => Err(ProtoError::UnexpectedCommand(other)),
        }
    }
}

struct JoinHead {
    proto: u8,
    client_version: u16,
    cookie: String,
    seeks_public: bool,
    advertise: bool,
}

impl JoinHead {
    fn read(r: &mut FrameReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            proto: r.u8()?,
            client_version: r.u16()?,
            cookie: r.string(MAX_COOKIE_LEN)?,
            seeks_public: r.u8()? != 0,
            advertise: r.u8()? != 0,
        })
    }

    fn into_join(
        self,
        n_here: u8,
        n_total: u8,
        seed: u16,
        lang: u8,
        devid: Option<DevId>,
    ) -> JoinRequest {
        JoinRequest {
            proto: self.proto,
            client_version: self.client_version,
            cookie: self.cookie,
            seeks_public: self.seeks_public,
            advertise: self.advertise,
            n_here,
            n_total,
            seed,
            lang,
            devid,
        }
    }
}

/// Older clients end the frame before the device id; treat that as none.
fn read_devid(r: &mut FrameReader<'_>) -> Result<Option<DevId>, ProtoError> {
    if r.remaining() == 0 {
        return Ok(None);
    }
    let byte = r.u8()?;
    let kind = DevIdType::from_u8(byte).ok_or(ProtoError::BadDevIdType(byte))?;
    if kind == DevIdType::None {
        return Ok(None);
    }
    let id = r.string(MAX_DEVID_LEN)?;
    Ok(Some(DevId { kind, id }))
}
