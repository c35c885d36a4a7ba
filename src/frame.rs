use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

const CRLF: &[u8] = b"\r\n";

/// A fully decoded unit of the wire protocol.
///
/// https://redis.io/docs/reference/protocol-spec/#resp-protocol-description
///
/// Two dialect quirks to be aware of: `*0\r\n` is the null/empty array
/// sentinel (so the parser never yields `Array(vec![])`), and `_\r\n` is a
/// standalone null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(Bytes),
    Error(Bytes),
    Integer(i64),
    Bulk(Bytes),
    NullBulk,
    Array(Vec<Frame>),
    NullArray,
    Null,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame prefix {0:#04x}")]
    InvalidPrefix(u8),
    #[error("invalid integer payload")]
    InvalidInteger,
    #[error("invalid length header")]
    InvalidLength,
    #[error("payload missing CRLF terminator")]
    MissingTerminator,
}

impl Frame {
    /// Decodes at most one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` while `buf` holds no complete frame; the caller
    /// should read more bytes and retry with the grown buffer. Returns
    /// `Ok(Some((frame, n)))` when the first `n` bytes decoded to `frame`,
    /// in which case the caller discards those `n` bytes. Malformed input is
    /// an `Err`, kept distinct from the incomplete case.
    ///
    /// The parser is pure over the slice: partial input never changes state
    /// because there is none.
    pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        let Some(&prefix) = buf.first() else {
            return Ok(None);
        };
        match prefix {
            b'+' => Ok(line(buf).map(|(body, n)| (Frame::Simple(Bytes::copy_from_slice(body)), n))),
            b'-' => Ok(line(buf).map(|(body, n)| (Frame::Error(Bytes::copy_from_slice(body)), n))),
            b':' => match line(buf) {
                None => Ok(None),
                Some((body, n)) => Ok(Some((Frame::Integer(int(body)?), n))),
            },
            b'$' => parse_bulk(buf),
            b'*' => parse_array(buf),
            b'_' => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                if &buf[1..3] != CRLF {
                    return Err(FrameError::MissingTerminator);
                }
                Ok(Some((Frame::Null, 3)))
            }
            other => Err(FrameError::InvalidPrefix(other)),
        }
    }

    /// Appends the canonical wire form of this frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(body) => {
                buf.put_u8(b'+');
                buf.put_slice(body);
                buf.put_slice(CRLF);
            }
            Frame::Error(body) => {
                buf.put_u8(b'-');
                buf.put_slice(body);
                buf.put_slice(CRLF);
            }
            Frame::Integer(value) => {
                buf.put_u8(b':');
                buf.put_slice(value.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Frame::Bulk(payload) => {
                buf.put_u8(b'$');
                buf.put_slice(payload.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(payload);
                buf.put_slice(CRLF);
            }
            Frame::NullBulk => buf.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                buf.put_u8(b'*');
                buf.put_slice(items.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in items {
                    item.encode(buf);
                }
            }
            Frame::NullArray => buf.put_slice(b"*0\r\n"),
            Frame::Null => buf.put_slice(b"_\r\n"),
        }
    }

    /// Canonical wire form in a freshly allocated buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn simple(body: impl Into<Bytes>) -> Frame {
        Frame::Simple(body.into())
    }

    pub fn bulk(payload: impl Into<Bytes>) -> Frame {
        Frame::Bulk(payload.into())
    }

    pub fn error(message: impl Into<String>) -> Frame {
        Frame::Error(message.into().into_bytes().into())
    }

    /// The payload, if this is a bulk string frame.
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Frame::Bulk(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Body of a line-terminated frame: the bytes between the prefix and the
/// first CRLF, plus the total consumed count. `None` until the terminator
/// arrives.
fn line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let at = buf.windows(2).position(|pair| pair == CRLF)?;
    Some((&buf[1..at], at + 2))
}

fn int(body: &[u8]) -> Result<i64, FrameError> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(FrameError::InvalidInteger)
}

fn length(body: &[u8]) -> Result<i64, FrameError> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(FrameError::InvalidLength)
}

fn parse_bulk(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let Some((header, header_len)) = line(buf) else {
        return Ok(None);
    };
    let declared = length(header)?;
    if declared == -1 {
        return Ok(Some((Frame::NullBulk, header_len)));
    }
    let Ok(payload_len) = usize::try_from(declared) else {
        return Err(FrameError::InvalidLength);
    };
    let total = header_len + payload_len + CRLF.len();
    if buf.len() < total {
        return Ok(None);
    }
    // The declared length and the terminator must agree; anything else is a
    // corrupt frame, not a short read.
    if &buf[header_len + payload_len..total] != CRLF {
        return Err(FrameError::MissingTerminator);
    }
    let payload = Bytes::copy_from_slice(&buf[header_len..header_len + payload_len]);
    Ok(Some((Frame::Bulk(payload), total)))
}

fn parse_array(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let Some((header, header_len)) = line(buf) else {
        return Ok(None);
    };
    let count = length(header)?;
    if count < 0 {
        return Err(FrameError::InvalidLength);
    }
    if count == 0 {
        return Ok(Some((Frame::NullArray, header_len)));
    }
    let mut items = Vec::new();
    let mut consumed = header_len;
    for _ in 0..count {
        match Frame::parse(&buf[consumed..])? {
            None => return Ok(None),
            Some((item, n)) => {
                items.push(item);
                consumed += n;
            }
        }
    }
    Ok(Some((Frame::Array(items), consumed)))
}
