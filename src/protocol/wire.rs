//! Wire primitives shared by requests and responses.
//!
//! All integers are big-endian `u32`. Strings are a `u32` byte length
//! followed by that many bytes of UTF-8. Messages carry no overall length
//! prefix; framing is implied by the typed field layout, so decoding reads
//! directly off the stream.

use std::fmt;
use std::io::{self, ErrorKind};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest accepted string field, in bytes.
pub const MAX_STRING_LEN: u32 = 64 * 1024;

/// Largest accepted list, in elements.
pub const MAX_LIST_LEN: u32 = 4096;

/// Errors produced while decoding protocol messages.
#[derive(Debug)]
pub enum ProtocolError {
    /// Underlying transport failure, including truncation mid-message.
    Io(io::Error),
    /// The peer closed the stream at a message boundary.
    Closed,
    /// String bytes were not valid UTF-8.
    InvalidUtf8,
    /// Unknown request type tag.
    InvalidRequestType(u32),
    /// Unknown response type tag.
    InvalidResponseType(u32),
    /// Unknown error code.
    InvalidErrorType(u32),
    /// Declared string length exceeds [`MAX_STRING_LEN`].
    StringTooLong(u32),
    /// Declared list length exceeds [`MAX_LIST_LEN`].
    ListTooLong(u32),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Io(err) => write!(f, "IO error: {}", err),
            ProtocolError::Closed => write!(f, "stream closed"),
            ProtocolError::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            ProtocolError::InvalidRequestType(tag) => write!(f, "invalid request type: {}", tag),
            ProtocolError::InvalidResponseType(tag) => write!(f, "invalid response type: {}", tag),
            ProtocolError::InvalidErrorType(code) => write!(f, "invalid error type: {}", code),
            ProtocolError::StringTooLong(len) => write!(f, "string too long: {} bytes", len),
            ProtocolError::ListTooLong(len) => write!(f, "list too long: {} elements", len),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        ProtocolError::Io(err)
    }
}

/// Append a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Read one big-endian `u32`.
pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, ProtocolError> {
    Ok(r.read_u32().await?)
}

/// Read the `u32` tag that opens a message, mapping EOF to a clean close.
pub async fn read_tag<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, ProtocolError> {
    match r.read_u32().await {
        Ok(tag) => Ok(tag),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(ProtocolError::Closed),
        Err(err) => Err(ProtocolError::Io(err)),
    }
}

/// Read one length-prefixed UTF-8 string.
pub async fn read_string<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, ProtocolError> {
    let len = read_u32(r).await?;
    if len > MAX_STRING_LEN {
        return Err(ProtocolError::StringTooLong(len));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Read a list length.
pub async fn read_count<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, ProtocolError> {
    let count = read_u32(r).await?;
    if count > MAX_LIST_LEN {
        return Err(ProtocolError::ListTooLong(count));
    }
    Ok(count)
}
