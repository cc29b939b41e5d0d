//! TCP multi-user chat broker.
//!
//! A long-running server that accepts concurrent client connections,
//! maintains a directory of connected users and named rooms, and routes text
//! between them over a compact big-endian binary protocol.
//!
//! ## Architecture
//!
//! - One acceptor task spawns one session task per accepted connection.
//! - Each session owns the socket's write half; a reader sub-task decodes
//!   requests off the read half. A `select!` multiplexer is the only place
//!   the socket is written, and requests dispatch in decode order.
//! - Users and rooms live in independently locked registries; room fan-out
//!   enqueues onto each recipient's bounded outbound queue under a single
//!   acquisition of the room's members lock.
//! - The permanent `"general"` room exists from bootstrap and holds every
//!   connected user; other rooms are deleted when their last member leaves.
//!
//! ## Example
//!
//! ```rust,ignore
//! use palaver::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> palaver::Result<()> {
//!     let server = ChatServer::bind(ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{ChatClient, ClientConfig};
pub use error::{ChatError, Result};
pub use protocol::{
    ErrorCode, ProtocolError, Request, RequestType, Response, ResponseType, PROTOCOL_VERSION,
};
pub use server::{ChatServer, ServerConfig, GENERAL_ROOM};
