// Length-delimited framing over TCP.
//
// Every frame is a 2-byte big-endian length followed by that many bytes.
// Zero-length frames are legal on the wire and skipped by readers.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame representable by the 2-byte prefix.
pub const MAX_WIRE_FRAME: usize = u16::MAX as usize;

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closes cleanly between frames,
/// `InvalidData` if the prefix exceeds `max_len`, and `UnexpectedEof` if the
/// stream ends inside a frame.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut len_buf = [0u8; 2];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = usize::from(u16::from_be_bytes(len_buf));
        if len == 0 {
            continue;
        }
        if len > max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame too large: {len} bytes (max {max_len})"),
            ));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        return Ok(Some(buf));
    }
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(frame.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes (max {MAX_WIRE_FRAME})", frame.len()),
        )
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await
}
