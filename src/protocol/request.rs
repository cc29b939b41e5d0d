//! Client-to-server request taxonomy and codec.

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncRead;

use super::wire::{self, ProtocolError};

/// Request type tags carried on the wire.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Keepalive = 0,
    Connect = 1,
    Disconnect = 2,
    ListRooms = 3,
    ListUsers = 4,
    MessageRoom = 5,
    MessageUser = 6,
    CreateRoom = 7,
    JoinRoom = 8,
    LeaveRoom = 9,
}

impl RequestType {
    /// Convert from the wire value, `None` for unknown tags.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(RequestType::Keepalive),
            1 => Some(RequestType::Connect),
            2 => Some(RequestType::Disconnect),
            3 => Some(RequestType::ListRooms),
            4 => Some(RequestType::ListUsers),
            5 => Some(RequestType::MessageRoom),
            6 => Some(RequestType::MessageUser),
            7 => Some(RequestType::CreateRoom),
            8 => Some(RequestType::JoinRoom),
            9 => Some(RequestType::LeaveRoom),
            _ => None,
        }
    }
}

/// A client-to-server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// No-op; exists to keep idle connections alive and reset any read
    /// deadline on the server.
    Keepalive,
    /// Handshake; must be the first non-keepalive request on a connection.
    Connect { version: u32, name: String },
    /// Ask the server to end the session.
    Disconnect,
    /// List all rooms, or the rooms containing `user` when non-empty.
    ListRooms { user: String },
    /// List all connected users, or the members of `room` when non-empty.
    ListUsers { room: String },
    /// Broadcast text to every member of a room except the sender.
    MessageRoom { room: String, text: String },
    /// Send text directly to one user.
    MessageUser { user: String, text: String },
    /// Create an empty room; the creator does not join automatically.
    CreateRoom { room: String },
    /// Join an existing room; idempotent for current members.
    JoinRoom { room: String },
    /// Leave a room; non-general rooms left empty are deleted.
    LeaveRoom { room: String },
}

impl Request {
    /// The wire tag for this request.
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Keepalive => RequestType::Keepalive,
            Request::Connect { .. } => RequestType::Connect,
            Request::Disconnect => RequestType::Disconnect,
            Request::ListRooms { .. } => RequestType::ListRooms,
            Request::ListUsers { .. } => RequestType::ListUsers,
            Request::MessageRoom { .. } => RequestType::MessageRoom,
            Request::MessageUser { .. } => RequestType::MessageUser,
            Request::CreateRoom { .. } => RequestType::CreateRoom,
            Request::JoinRoom { .. } => RequestType::JoinRoom,
            Request::LeaveRoom { .. } => RequestType::LeaveRoom,
        }
    }

    /// Encode the tag followed by the payload fields in declaration order.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.request_type() as u32);
        match self {
            Request::Keepalive | Request::Disconnect => {}
            Request::Connect { version, name } => {
                buf.put_u32(*version);
                wire::put_string(buf, name);
            }
            Request::ListRooms { user } => wire::put_string(buf, user),
            Request::ListUsers { room } => wire::put_string(buf, room),
            Request::MessageRoom { room, text } => {
                wire::put_string(buf, room);
                wire::put_string(buf, text);
            }
            Request::MessageUser { user, text } => {
                wire::put_string(buf, user);
                wire::put_string(buf, text);
            }
            Request::CreateRoom { room }
            | Request::JoinRoom { room }
            | Request::LeaveRoom { room } => wire::put_string(buf, room),
        }
    }

    /// Decode one request off the stream.
    pub async fn decode<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, ProtocolError> {
        let tag = wire::read_tag(r).await?;
        let Some(tag) = RequestType::from_u32(tag) else {
            return Err(ProtocolError::InvalidRequestType(tag));
        };

        Ok(match tag {
            RequestType::Keepalive => Request::Keepalive,
            RequestType::Connect => Request::Connect {
                version: wire::read_u32(r).await?,
                name: wire::read_string(r).await?,
            },
            RequestType::Disconnect => Request::Disconnect,
            RequestType::ListRooms => Request::ListRooms {
                user: wire::read_string(r).await?,
            },
            RequestType::ListUsers => Request::ListUsers {
                room: wire::read_string(r).await?,
            },
            RequestType::MessageRoom => Request::MessageRoom {
                room: wire::read_string(r).await?,
                text: wire::read_string(r).await?,
            },
            RequestType::MessageUser => Request::MessageUser {
                user: wire::read_string(r).await?,
                text: wire::read_string(r).await?,
            },
            RequestType::CreateRoom => Request::CreateRoom {
                room: wire::read_string(r).await?,
            },
            RequestType::JoinRoom => Request::JoinRoom {
                room: wire::read_string(r).await?,
            },
            RequestType::LeaveRoom => Request::LeaveRoom {
                room: wire::read_string(r).await?,
            },
        })
    }
}
