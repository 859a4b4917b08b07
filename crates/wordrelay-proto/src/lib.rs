//! wordrelay wire protocol
//!
//! Relay control frames exchanged between game clients and the relay:
//! - command, reason and device-id codes
//! - 2-byte length-prefixed framing over TCP
//! - decoding of client frames
//! - encoding of relay responses and notices

pub mod codes;
pub mod error;
pub mod framing;
pub mod inbound;
pub mod outbound;
pub mod reader;
pub mod writer;

pub use codes::{DevIdType, Reason, RelayCmd};
pub use error::ProtoError;
pub use inbound::{ClientFrame, DevId, JoinRequest, RejoinRequest};
pub use outbound::{ConnectResponse, DevIdReply};
