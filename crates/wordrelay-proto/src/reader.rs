//! Big-endian cursor over a received frame.

use crate::error::ProtoError;

/// Reads fixed-width big-endian fields and u8-length-prefixed strings.
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtoError> {
        if self.remaining() < n {
            return Err(ProtoError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, ProtoError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ProtoError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, ProtoError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Length-prefixed UTF-8 string no longer than `max` bytes.
    pub fn string(&mut self, max: usize) -> Result<String, ProtoError> {
        let len = usize::from(self.u8()?);
        if len > max {
            return Err(ProtoError::StringTooLong { len, max });
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtoError::InvalidUtf8)
    }

    /// Everything left in the frame.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_fields() {
        let mut r = FrameReader::new(&[0x01, 0x02, 0x03, 0x00, 0x00, 0x01, 0x00, 0xff]);
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.u16().unwrap(), 0x0203);
        assert_eq!(r.u32().unwrap(), 0x0000_0100);
        assert_eq!(r.rest(), &[0xff]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn short_buffer_is_truncated() {
        let mut r = FrameReader::new(&[0x01]);
        let err = r.u16().unwrap_err();
        assert_eq!(
            err,
            ProtoError::Truncated {
                needed: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn string_respects_limit() {
        let mut r = FrameReader::new(&[3, b'a', b'b', b'c']);
        assert_eq!(r.string(3).unwrap(), "abc");

        let mut r = FrameReader::new(&[3, b'a', b'b', b'c']);
        assert!(matches!(
            r.string(2),
            Err(ProtoError::StringTooLong { len: 3, max: 2 })
        ));
    }

    #[test]
    fn empty_string_is_fine() {
        let mut r = FrameReader::new(&[0]);
        assert_eq!(r.string(8).unwrap(), "");
    }
}
