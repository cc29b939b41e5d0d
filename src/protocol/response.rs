//! Server-to-client response taxonomy and codec.

use std::fmt;

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncRead;

use super::wire::{self, ProtocolError};

/// Response type tags carried on the wire.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    Error = 1,
    FatalError = 2,
    RoomList = 3,
    UserList = 4,
    RoomMessage = 5,
    UserMessage = 6,
}

impl ResponseType {
    /// Convert from the wire value, `None` for unknown tags.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(ResponseType::Error),
            2 => Some(ResponseType::FatalError),
            3 => Some(ResponseType::RoomList),
            4 => Some(ResponseType::UserList),
            5 => Some(ResponseType::RoomMessage),
            6 => Some(ResponseType::UserMessage),
            _ => None,
        }
    }
}

/// Error codes carried in `Error` and `FatalError` responses.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotConnected = 1,
    AlreadyConnected = 2,
    InternalError = 3,
    MalformedRequest = 4,
    UnsupportedVersion = 5,
    MissingRoom = 6,
    MissingUser = 7,
    ExistingRoom = 8,
    ExistingUser = 9,
    InvalidRoom = 10,
    InvalidUser = 11,
    InvalidText = 12,
}

impl ErrorCode {
    /// Convert from the wire value, `None` for unknown codes.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(ErrorCode::NotConnected),
            2 => Some(ErrorCode::AlreadyConnected),
            3 => Some(ErrorCode::InternalError),
            4 => Some(ErrorCode::MalformedRequest),
            5 => Some(ErrorCode::UnsupportedVersion),
            6 => Some(ErrorCode::MissingRoom),
            7 => Some(ErrorCode::MissingUser),
            8 => Some(ErrorCode::ExistingRoom),
            9 => Some(ErrorCode::ExistingUser),
            10 => Some(ErrorCode::InvalidRoom),
            11 => Some(ErrorCode::InvalidUser),
            12 => Some(ErrorCode::InvalidText),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NotConnected => "NotConnected",
            ErrorCode::AlreadyConnected => "AlreadyConnected",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::MalformedRequest => "MalformedRequest",
            ErrorCode::UnsupportedVersion => "UnsupportedVersion",
            ErrorCode::MissingRoom => "MissingRoom",
            ErrorCode::MissingUser => "MissingUser",
            ErrorCode::ExistingRoom => "ExistingRoom",
            ErrorCode::ExistingUser => "ExistingUser",
            ErrorCode::InvalidRoom => "InvalidRoom",
            ErrorCode::InvalidUser => "InvalidUser",
            ErrorCode::InvalidText => "InvalidText",
        };
        f.write_str(name)
    }
}

/// A server-to-client response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Recoverable error; the session continues.
    Error { code: ErrorCode, info: String },
    /// Terminal error; both endpoints close the connection after this.
    FatalError { code: ErrorCode, info: String },
    /// Room names matching a `ListRooms` request.
    RoomList { user: String, rooms: Vec<String> },
    /// User names matching a `ListUsers` request.
    UserList { room: String, users: Vec<String> },
    /// A message broadcast to a room.
    RoomMessage {
        room: String,
        sender: String,
        text: String,
    },
    /// A message sent directly to this user.
    UserMessage { sender: String, text: String },
}

impl Response {
    /// The wire tag for this response.
    pub fn response_type(&self) -> ResponseType {
        match self {
            Response::Error { .. } => ResponseType::Error,
            Response::FatalError { .. } => ResponseType::FatalError,
            Response::RoomList { .. } => ResponseType::RoomList,
            Response::UserList { .. } => ResponseType::UserList,
            Response::RoomMessage { .. } => ResponseType::RoomMessage,
            Response::UserMessage { .. } => ResponseType::UserMessage,
        }
    }

    /// True when this response obligates both ends to close the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Response::FatalError { .. })
    }

    /// Encode the tag followed by the payload fields in declaration order.
    /// List counts are derived from the element vectors.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.response_type() as u32);
        match self {
            Response::Error { code, info } | Response::FatalError { code, info } => {
                buf.put_u32(*code as u32);
                wire::put_string(buf, info);
            }
            Response::RoomList { user, rooms } => {
                wire::put_string(buf, user);
                buf.put_u32(rooms.len() as u32);
                for room in rooms {
                    wire::put_string(buf, room);
                }
            }
            Response::UserList { room, users } => {
                wire::put_string(buf, room);
                buf.put_u32(users.len() as u32);
                for user in users {
                    wire::put_string(buf, user);
                }
            }
            Response::RoomMessage { room, sender, text } => {
                wire::put_string(buf, room);
                wire::put_string(buf, sender);
                wire::put_string(buf, text);
            }
            Response::UserMessage { sender, text } => {
                wire::put_string(buf, sender);
                wire::put_string(buf, text);
            }
        }
    }

    /// Decode one response off the stream.
    pub async fn decode<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, ProtocolError> {
        let tag = wire::read_tag(r).await?;
        let Some(tag) = ResponseType::from_u32(tag) else {
            return Err(ProtocolError::InvalidResponseType(tag));
        };

        Ok(match tag {
            ResponseType::Error => Response::Error {
                code: read_error_code(r).await?,
                info: wire::read_string(r).await?,
            },
            ResponseType::FatalError => Response::FatalError {
                code: read_error_code(r).await?,
                info: wire::read_string(r).await?,
            },
            ResponseType::RoomList => {
                let user = wire::read_string(r).await?;
                let rooms = read_string_list(r).await?;
                Response::RoomList { user, rooms }
            }
            ResponseType::UserList => {
                let room = wire::read_string(r).await?;
                let users = read_string_list(r).await?;
                Response::UserList { room, users }
            }
            ResponseType::RoomMessage => Response::RoomMessage {
                room: wire::read_string(r).await?,
                sender: wire::read_string(r).await?,
                text: wire::read_string(r).await?,
            },
            ResponseType::UserMessage => Response::UserMessage {
                sender: wire::read_string(r).await?,
                text: wire::read_string(r).await?,
            },
        })
    }
}

async fn read_error_code<R: AsyncRead + Unpin>(r: &mut R) -> Result<ErrorCode, ProtocolError> {
    let code = wire::read_u32(r).await?;
    ErrorCode::from_u32(code).ok_or(ProtocolError::InvalidErrorType(code))
}

async fn read_string_list<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<String>, ProtocolError> {
    let count = wire::read_count(r).await?;
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(wire::read_string(r).await?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(response: Response) {
        let mut buf = BytesMut::new();
        response.encode(&mut buf);

        let mut data = &buf[..];
        let decoded = Response::decode(&mut data).await.unwrap();
        assert_eq!(response, decoded);
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_response_roundtrip() {
        roundtrip(Response::Error {
            code: ErrorCode::MissingRoom,
            info: "r1".to_string(),
        })
        .await;
        roundtrip(Response::FatalError {
            code: ErrorCode::ExistingUser,
            info: "username already exists".to_string(),
        })
        .await;
        roundtrip(Response::RoomList {
            user: String::new(),
            rooms: vec!["general".to_string(), "r1".to_string()],
        })
        .await;
        roundtrip(Response::UserList {
            room: "general".to_string(),
            users: vec!["alice".to_string(), "bob".to_string()],
        })
        .await;
        roundtrip(Response::RoomMessage {
            room: "general".to_string(),
            sender: "alice".to_string(),
            text: "hi".to_string(),
        })
        .await;
        roundtrip(Response::UserMessage {
            sender: "bob".to_string(),
            text: "psst".to_string(),
        })
        .await;
    }

    #[test]
    fn test_error_wire_layout() {
        let mut buf = BytesMut::new();
        Response::Error {
            code: ErrorCode::UnsupportedVersion,
            info: "info".to_string(),
        }
        .encode(&mut buf);

        #[rustfmt::skip]
        let expected = [
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x05,
            0x00, 0x00, 0x00, 0x04, b'i', b'n', b'f', b'o',
        ];
        assert_eq!(&buf[..], expected);
    }

    #[test]
    fn test_room_list_wire_layout() {
        let mut buf = BytesMut::new();
        Response::RoomList {
            user: String::new(),
            rooms: vec!["A".to_string(), "BB".to_string(), "CCC".to_string()],
        }
        .encode(&mut buf);

        #[rustfmt::skip]
        let expected = [
            0x00, 0x00, 0x00, 0x03,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x03,
            0x00, 0x00, 0x00, 0x01, b'A',
            0x00, 0x00, 0x00, 0x02, b'B', b'B',
            0x00, 0x00, 0x00, 0x03, b'C', b'C', b'C',
        ];
        assert_eq!(&buf[..], expected);
    }

    #[tokio::test]
    async fn test_invalid_response_type() {
        let mut data: &[u8] = &[0x00, 0x00, 0x00, 0x07];
        let result = Response::decode(&mut data).await;
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidResponseType(7))
        ));
    }

    #[tokio::test]
    async fn test_invalid_error_code() {
        // Error response with code 13, one past the defined range.
        let mut data: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0D];
        let result = Response::decode(&mut data).await;
        assert!(matches!(result, Err(ProtocolError::InvalidErrorType(13))));
    }

    #[tokio::test]
    async fn test_stream_framing() {
        let responses = vec![
            Response::RoomMessage {
                room: "general".to_string(),
                sender: "alice".to_string(),
                text: "one".to_string(),
            },
            Response::UserMessage {
                sender: "bob".to_string(),
                text: "two".to_string(),
            },
            Response::Error {
                code: ErrorCode::MissingUser,
                info: "carol".to_string(),
            },
        ];

        let mut buf = BytesMut::new();
        for response in &responses {
            response.encode(&mut buf);
        }

        let mut data = &buf[..];
        for expected in &responses {
            let decoded = Response::decode(&mut data).await.unwrap();
            assert_eq!(*expected, decoded);
        }
        assert!(matches!(
            Response::decode(&mut data).await,
            Err(ProtocolError::Closed)
        ));
    }
}
