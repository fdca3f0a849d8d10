//! Length-prefixed framing shared by both pipelines.
//!
//! ```text
//! +------------------+-------------------+
//! | Length (4 bytes) | Payload (N bytes) |
//! | (big-endian u32) |                   |
//! +------------------+-------------------+
//! ```
//!
//! The IO helpers here report how many bytes were actually moved even when
//! they fail, so continuations can be told the byte count of a failing
//! operation.

use crate::error::{LinkError, LinkResult};
use crate::pipeline::{FrameIo, Transferred};
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Upper bound on how much receive buffer is grown per read call.
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Encode a body length as a network byte order header.
pub fn encode_header(len: usize) -> LinkResult<[u8; FRAME_HEADER_LEN]> {
    let len32 = u32::try_from(len).map_err(|_| LinkError::FrameTooLarge {
        len: len as u64,
        max: u32::MAX,
    })?;
    Ok(len32.to_be_bytes())
}

/// Decode a network byte order header into a body length.
pub fn decode_header(header: [u8; FRAME_HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header)
}

/// Encode a complete frame (header followed by payload).
pub fn encode_frame(payload: &[u8]) -> LinkResult<Vec<u8>> {
    let header = encode_header(payload.len())?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Fill `buf` completely, returning the bytes read alongside the outcome.
pub(crate) async fn read_exact_counted<R>(reader: &mut R, buf: &mut [u8]) -> (usize, io::Result<()>)
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => return (filled, Err(io::ErrorKind::UnexpectedEof.into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (filled, Err(e)),
        }
    }
    (filled, Ok(()))
}

/// Append exactly `len` bytes to `buf`.
///
/// Each chunk is read into scratch space and only appended once it has
/// arrived, so `buf` never holds bytes that were not received, even if the
/// future is dropped part way. On failure `buf` is restored to its original
/// length.
pub(crate) async fn read_body_counted<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    len: usize,
) -> (usize, io::Result<()>)
where
    R: AsyncRead + Unpin + ?Sized,
{
    let start = buf.len();
    let mut chunk = vec![0u8; len.min(READ_CHUNK_BYTES)];
    let mut filled = 0;
    while filled < len {
        let want = (len - filled).min(chunk.len());
        match reader.read(&mut chunk[..want]).await {
            Ok(0) => {
                buf.truncate(start);
                return (filled, Err(io::ErrorKind::UnexpectedEof.into()));
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                filled += n;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                buf.truncate(start);
                return (filled, Err(e));
            }
        }
    }
    (filled, Ok(()))
}

/// Write all of `data`, returning the bytes written alongside the outcome.
pub(crate) async fn write_all_counted<W>(writer: &mut W, data: &[u8]) -> (usize, io::Result<()>)
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    while written < data.len() {
        match writer.write(&data[written..]).await {
            Ok(0) => return (written, Err(io::ErrorKind::WriteZero.into())),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (written, Err(e)),
        }
    }
    (written, Ok(()))
}

/// Reads one frame per transfer from the read side of a stream.
pub(crate) struct FrameReader<R> {
    inner: R,
    max_frame_len: u32,
}

impl<R> FrameReader<R> {
    pub(crate) fn new(inner: R, max_frame_len: u32) -> Self {
        Self {
            inner,
            max_frame_len,
        }
    }
}

#[async_trait]
impl<R> FrameIo for FrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    const DIRECTION: &'static str = "receive";

    async fn transfer(&mut self, buffer: &mut Vec<u8>) -> Transferred {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let (read, result) = read_exact_counted(&mut self.inner, &mut header).await;
        if let Err(e) = result {
            return Transferred::Failed {
                error: e.into(),
                bytes: read,
            };
        }

        let len = decode_header(header);
        if len > self.max_frame_len {
            // The header is consumed; the stream is now out of step.
            return Transferred::Failed {
                error: LinkError::FrameTooLarge {
                    len: u64::from(len),
                    max: self.max_frame_len,
                },
                bytes: FRAME_HEADER_LEN,
            };
        }

        trace!(len, "reading frame body");
        let (read, result) = read_body_counted(&mut self.inner, buffer, len as usize).await;
        match result {
            Ok(()) => Transferred::Done(read),
            Err(e) => Transferred::Failed {
                error: e.into(),
                bytes: read,
            },
        }
    }
}

/// Writes one frame per transfer to the write side of a stream.
pub(crate) struct FrameWriter<W> {
    inner: W,
    max_frame_len: u32,
}

impl<W> FrameWriter<W> {
    pub(crate) fn new(inner: W, max_frame_len: u32) -> Self {
        Self {
            inner,
            max_frame_len,
        }
    }
}

#[async_trait]
impl<W> FrameIo for FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    const DIRECTION: &'static str = "send";

    async fn transfer(&mut self, buffer: &mut Vec<u8>) -> Transferred {
        // Oversized requests are refused before anything reaches the stream.
        if buffer.len() as u64 > u64::from(self.max_frame_len) {
            return Transferred::Rejected(LinkError::FrameTooLarge {
                len: buffer.len() as u64,
                max: self.max_frame_len,
            });
        }
        let header = match encode_header(buffer.len()) {
            Ok(header) => header,
            Err(e) => return Transferred::Rejected(e),
        };

        let (written, result) = write_all_counted(&mut self.inner, &header).await;
        if let Err(e) = result {
            return Transferred::Failed {
                error: e.into(),
                bytes: written,
            };
        }

        let (written, result) = write_all_counted(&mut self.inner, buffer).await;
        if let Err(e) = result {
            return Transferred::Failed {
                error: e.into(),
                bytes: written,
            };
        }
        if let Err(e) = self.inner.flush().await {
            return Transferred::Failed {
                error: e.into(),
                bytes: written,
            };
        }

        trace!(len = written, "frame written");
        Transferred::Done(written)
    }
}
