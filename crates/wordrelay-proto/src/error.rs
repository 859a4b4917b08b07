use thiserror::Error;

/// Reasons a client frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("empty frame")]
    Empty,

    #[error("unknown command byte {0}")]
    UnknownCommand(u8),

    #[error("command {0:?} is not accepted from clients")]
    UnexpectedCommand(crate::codes::RelayCmd),

    #[error("frame truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("string of {len} bytes exceeds limit of {max}")]
    StringTooLong { len: usize, max: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown device id type {0}")]
    BadDevIdType(u8),
}
