use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{Frame, FrameError};

const DEFAULT_BUF_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Malformed bytes on the wire. Fatal for the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),
    /// The peer closed with a partial frame still buffered.
    #[error("connection closed mid-frame")]
    UnexpectedEof,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// A peer that vanishes is routine; the connection loop closes silently
    /// instead of logging.
    pub fn is_peer_disconnect(&self) -> bool {
        match self {
            ConnectionError::Io(cause) => matches!(
                cause.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// A wrapper over a stream, used to read and write RESP frames.
///
/// Reads go through a growing `BytesMut`: the stream is pulled in
/// `buffer_size` chunks and the frame parser is retried on the buffered
/// prefix until a complete frame appears. Bytes past that frame stay
/// buffered, which is what makes pipelined requests work. Writes are staged
/// in a reusable buffer and flushed per frame, so replies hit the wire in
/// dispatch order.
pub struct Connection<RW> {
    stream: RW,
    read_buf: BytesMut,
    write_buf: BytesMut,
    chunk_size: usize,
}

impl<RW: AsyncRead + AsyncWrite + Unpin> Connection<RW> {
    /// Creates a new Connection with the default 4 KB read chunk.
    pub fn new(stream: RW) -> Self {
        Self::with_buffer_size(stream, DEFAULT_BUF_SIZE)
    }

    /// `buffer_size` bounds how much is pulled from the stream per read; the
    /// frame buffer itself grows as needed.
    pub fn with_buffer_size(stream: RW, buffer_size: usize) -> Self {
        Connection {
            stream,
            read_buf: BytesMut::with_capacity(buffer_size),
            write_buf: BytesMut::with_capacity(buffer_size),
            chunk_size: buffer_size,
        }
    }

    /// Reads the next complete frame from the stream, returning:
    /// - `Ok(None)`, if the peer closed cleanly between frames
    /// - `Ok(Some(frame))`, once a complete frame has been buffered
    /// - `Err(...)`, on malformed bytes or a close mid-frame
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            if let Some((frame, consumed)) = Frame::parse(&self.read_buf)? {
                self.read_buf.advance(consumed);
                return Ok(Some(frame));
            }
            self.read_buf.reserve(self.chunk_size);
            if 0 == self.stream.read_buf(&mut self.read_buf).await? {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::UnexpectedEof);
            }
        }
    }

    /// Serializes `frame` and writes it out, flushing before returning so
    /// the reply is on the wire before the next frame is read.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        frame.encode(&mut self.write_buf);
        self.stream.write_all_buf(&mut self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
