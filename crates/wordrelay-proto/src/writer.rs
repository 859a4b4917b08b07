//! Frame builder, the write-side twin of [`crate::reader::FrameReader`].

use crate::codes::RelayCmd;

#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    /// Start a frame with its command byte.
    pub fn new(cmd: RelayCmd) -> Self {
        let mut buf = Vec::with_capacity(32);
        buf.push(cmd.as_u8());
        Self { buf }
    }

    #[must_use]
    pub fn u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    #[must_use]
    pub fn u16(mut self, v: u16) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    #[must_use]
    pub fn u32(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Writes a u8 length then the bytes. Strings longer than 255 bytes are
    /// cut at the last char boundary that fits.
    #[must_use]
    pub fn string(mut self, s: &str) -> Self {
        let mut end = s.len().min(usize::from(u8::MAX));
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        #[allow(clippy::cast_possible_truncation)]
        self.buf.push(end as u8);
        self.buf.extend_from_slice(&s.as_bytes()[..end]);
        self
    }

    #[must_use]
    pub fn bytes(mut self, b: &[u8]) -> Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_in_order() {
        let frame = FrameWriter::new(RelayCmd::ConnectResp)
            .u8(2)
            .u16(0x1234)
            .string("ab")
            .u32(7)
            .finish();
        assert_eq!(frame, vec![4, 2, 0x12, 0x34, 2, b'a', b'b', 0, 0, 0, 7]);
    }

    #[test]
    fn long_strings_are_capped() {
        let long = "x".repeat(300);
        let frame = FrameWriter::new(RelayCmd::None).string(&long).finish();
        assert_eq!(frame[1], 255);
        assert_eq!(frame.len(), 2 + 255);
    }
}
