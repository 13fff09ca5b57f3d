//! Framed byte-stream I/O.
//!
//! Thin layer over any tokio `AsyncRead`/`AsyncWrite` (TCP halves in
//! production, `tokio::io::duplex` in tests). It only moves frames; protocol
//! logic stays in the Sans-IO [`crate::Session`].

use bytes::{Buf, BytesMut};
use securechat_proto::{Frame, Message, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or its prefix was invalid.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer closed the stream in the middle of a frame.
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    Truncated {
        /// Bytes received for the incomplete frame
        buffered: usize,
    },
}

/// Reads length-prefixed frames.
///
/// # Cancel Safety
///
/// [`FrameReader::read_frame`] is cancel safe: partial frames stay in the
/// internal buffer, so it can be used as a `tokio::select!` branch.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner, buffer: BytesMut::with_capacity(8 * 1024) }
    }

    /// Next frame, or `None` on clean end of stream.
    ///
    /// # Errors
    ///
    /// - `TransportError::Protocol` if a prefix announces more than
    ///   [`Frame::MAX_PAYLOAD_SIZE`] (checked before the payload is read)
    /// - `TransportError::Truncated` if the stream ends inside a frame
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(len) = Frame::payload_len(&self.buffer)? {
                let total = Frame::PREFIX_SIZE + len;
                if self.buffer.len() >= total {
                    self.buffer.advance(Frame::PREFIX_SIZE);
                    let payload = self.buffer.split_to(len).freeze();
                    return Ok(Some(Frame::new(payload)));
                }
                self.buffer.reserve(total - self.buffer.len());
            }

            if self.inner.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::Truncated { buffered: self.buffer.len() });
            }
        }
    }

    /// Recover the underlying reader. Buffered bytes are discarded.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes length-prefixed frames.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner, buffer: BytesMut::new() }
    }

    /// Write and flush one frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.buffer.clear();
        frame.encode(&mut self.buffer)?;

        self.inner.write_all(&self.buffer).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Encode `message` as JSON and write it.
    pub async fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        self.write_frame(&message.to_frame()?).await
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
