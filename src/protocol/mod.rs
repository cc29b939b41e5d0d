//! Framed binary wire protocol shared by clients and the server.
//!
//! Every message is a `u32` type tag followed by its payload fields in
//! declaration order. All integers are big-endian; strings are
//! length-prefixed UTF-8. There is no per-message length prefix.

pub mod request;
pub mod response;
pub mod wire;

pub use request::{Request, RequestType};
pub use response::{ErrorCode, Response, ResponseType};
pub use wire::{ProtocolError, MAX_LIST_LEN, MAX_STRING_LEN};

/// The only protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u32 = 1;
