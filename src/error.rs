//! Error handling for the chat broker.

use std::fmt;
use std::io;

use crate::protocol::ProtocolError;

/// Result type alias for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat broker error types.
#[derive(Debug)]
pub enum ChatError {
    /// Network-related errors.
    Network(String),
    /// Wire protocol errors.
    Protocol(ProtocolError),
    /// Connection lifecycle errors.
    Connection(String),
    /// Configuration errors.
    Config(String),
}

impl ChatError {
    /// Create a network error.
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create a connection error.
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        ChatError::Connection(msg.into())
    }

    /// Create a configuration error.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Network(msg) => write!(f, "network error: {}", msg),
            ChatError::Protocol(err) => write!(f, "protocol error: {}", err),
            ChatError::Connection(msg) => write!(f, "connection error: {}", msg),
            ChatError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<io::Error> for ChatError {
    fn from(err: io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<ProtocolError> for ChatError {
    fn from(err: ProtocolError) -> Self {
        ChatError::Protocol(err)
    }
}
