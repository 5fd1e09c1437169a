use crate::messages::tlv::{self, FramingError, Tag, Tlv, FRAME_SENTINEL, HEADER_LEN};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, instrument, trace, warn};

// Wire protocol constants
pub const MAX_FRAME_SIZE: usize = HEADER_LEN + tlv::MAX_VALUE_LEN + 1;
pub const READ_CHUNK_SIZE: usize = 4096;

// Per-connection outbound queue depth
pub const SERVER_OUTBOUND_QUEUE: usize = 64;
pub const CLIENT_OUTBOUND_QUEUE: usize = 16;

// Frames above this size are allowed but logged
pub const SUSPICIOUS_FRAME_THRESHOLD: usize = 32 * 1024;

/// Configuration for frame reading and writing
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Largest complete frame (header, escaped value and sentinel) accepted from a peer
    pub max_frame_size: usize,
    /// Depth of the queue feeding a connection's writer task
    pub outbound_queue: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue: SERVER_OUTBOUND_QUEUE,
        }
    }
}

impl WireConfig {
    pub fn new(max_frame_size: usize, outbound_queue: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
            outbound_queue: outbound_queue.max(1),
        }
    }

    /// Server side: full frame size, deeper queue for pushes to many peers
    pub fn for_server() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue: SERVER_OUTBOUND_QUEUE,
        }
    }

    /// Client side: one request in flight at a time
    pub fn for_client() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue: CLIENT_OUTBOUND_QUEUE,
        }
    }
}

/// Errors from reading or writing frames on a stream
#[derive(Error, Debug)]
pub enum WireProtocolError {
    #[error("Frame too large: {size} bytes exceeds maximum of {max_size} bytes")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Malformed frame: {0}")]
    Framing(#[from] FramingError),

    #[error("Unexpected end of stream with {buffered} bytes of a partial frame buffered")]
    UnexpectedEof { buffered: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads complete frames from a byte stream.
///
/// Bytes are accumulated in an internal buffer that survives across calls, so
/// a `read_frame` future dropped mid-read (for example by losing a
/// `tokio::select!` race) never loses data: the next call resumes where the
/// previous one stopped.
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    config: WireConfig,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    pub fn with_config(inner: R, config: WireConfig) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
            config,
        }
    }

    /// Bytes received but not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read the next frame. `Ok(None)` means the peer closed the stream cleanly
    /// on a frame boundary.
    #[instrument(level = "trace", skip(self), fields(buffered = self.buffer.len()))]
    pub async fn read_frame(&mut self) -> Result<Option<Tlv>, WireProtocolError> {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = self.inner.read(&mut chunk).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    debug!("Stream closed on a frame boundary");
                    return Ok(None);
                }
                warn!(
                    buffered = self.buffer.len(),
                    "Stream closed in the middle of a frame"
                );
                return Err(WireProtocolError::UnexpectedEof {
                    buffered: self.buffer.len(),
                });
            }
            trace!("Read {} bytes from stream", read);
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// Split one frame off the front of the buffer if it is complete.
    ///
    /// The length field, not the sentinel, decides where a frame ends: the
    /// header bytes themselves may equal the sentinel.
    fn take_frame(&mut self) -> Result<Option<Tlv>, WireProtocolError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let frame_len = HEADER_LEN + tlv::declared_len(&self.buffer) + 1;
        if frame_len > self.config.max_frame_size {
            error!(
                size = frame_len,
                max_size = self.config.max_frame_size,
                "Incoming frame exceeds configured maximum"
            );
            return Err(WireProtocolError::FrameTooLarge {
                size: frame_len,
                max_size: self.config.max_frame_size,
            });
        }
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();
        if frame[frame_len - 1] != FRAME_SENTINEL {
            return Err(FramingError::MissingTerminator.into());
        }
        if frame_len > SUSPICIOUS_FRAME_THRESHOLD {
            warn!(size = frame_len, "Unusually large frame received");
        }

        let decoded = tlv::decode(&frame)?;
        trace!(tag = decoded.tag, len = decoded.value.len(), "Decoded frame");
        Ok(Some(decoded))
    }
}

/// Writes frames to a byte stream, flushing after each one.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, frame: &Tlv) -> Result<(), WireProtocolError> {
        let bytes = frame.encode()?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        trace!(
            tag = frame.tag,
            kind = Tag::from_byte(frame.tag).map(Tag::name).unwrap_or("unknown"),
            len = bytes.len(),
            "Wrote frame"
        );
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), WireProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::tlv::encode;

    #[tokio::test]
    async fn test_reads_back_to_back_frames() {
        let mut bytes = encode(Tag::Ack.as_byte(), b"first").unwrap();
        bytes.extend(encode(Tag::Rejected.as_byte(), b"sec\nond").unwrap());

        let mut reader = FrameReader::new(&bytes[..]);
        let first = reader.read_frame().await.unwrap().unwrap();
        let second = reader.read_frame().await.unwrap().unwrap();

        assert_eq!(first, Tlv::new(Tag::Ack, b"first".to_vec()));
        assert_eq!(second, Tlv::new(Tag::Rejected, b"sec\nond".to_vec()));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_length_byte_equal_to_sentinel() {
        // A value of ten bytes puts 0x0A in the length field.
        let value = b"0123456789";
        let bytes = encode(Tag::Ack.as_byte(), value).unwrap();
        assert_eq!(bytes[2], b'\n');

        let mut reader = FrameReader::new(&bytes[..]);
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.value, value);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let bytes = encode(Tag::MoveReceived.as_byte(), b"e4;fen").unwrap();
        let (head, tail) = bytes.split_at(4);
        let mock = tokio_test::io::Builder::new().read(head).read(tail).build();

        let mut reader = FrameReader::new(mock);
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.kind(), Some(Tag::MoveReceived));
        assert_eq!(frame.value, b"e4;fen");
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_an_error() {
        let bytes = encode(Tag::Ack.as_byte(), b"truncated").unwrap();
        let mut reader = FrameReader::new(&bytes[..5]);
        assert!(matches!(
            reader.read_frame().await,
            Err(WireProtocolError::UnexpectedEof { buffered: 5 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let bytes = encode(Tag::Ack.as_byte(), &[b'x'; 200]).unwrap();
        let mut reader = FrameReader::with_config(&bytes[..], WireConfig::new(64, 1));
        assert!(matches!(
            reader.read_frame().await,
            Err(WireProtocolError::FrameTooLarge { max_size: 64, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_terminator() {
        let mut bytes = encode(Tag::Ack.as_byte(), b"ok").unwrap();
        let last = bytes.len() - 1;
        bytes[last] = b'!';
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(WireProtocolError::Framing(FramingError::MissingTerminator))
        ));
    }

    #[tokio::test]
    async fn test_writer_emits_encoded_frame() {
        let frame = Tlv::new(Tag::Ack, b"hi".to_vec());
        let expected = frame.encode().unwrap();
        let mock = tokio_test::io::Builder::new().write(&expected).build();

        let mut writer = FrameWriter::new(mock);
        writer.write_frame(&frame).await.unwrap();
    }
}
