//! Error types for the hook-tool protocol.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for hook-tool RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors talking over the hook-tool socket.
#[derive(Debug, Error)]
pub enum Error {
    /// The bytes on the socket could not be understood.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The server refused the request.
    #[error("request rejected: {message}")]
    Rejected {
        /// Machine-readable reason.
        code: String,
        /// Human-readable reason.
        message: String,
    },

    /// The peer sent a message that is not valid at this point.
    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    /// The server closed the connection before answering.
    #[error("connection closed before a response was received")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),
}

/// Errors encoding or decoding a message.
#[derive(Debug, Error)]
pub enum WireError {
    /// Reading or writing the socket failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The payload exceeds the size limit.
    #[error("message size {size} exceeds maximum {max}")]
    TooLarge {
        /// Size of the payload.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The payload does not match its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    Checksum {
        /// Checksum in the header.
        expected: u32,
        /// Checksum of the payload received.
        actual: u32,
    },

    /// The header names no known message.
    #[error("unknown message tag {0:#x}")]
    UnknownTag(u8),

    /// A message could not be serialized.
    #[error("cannot encode message: {0}")]
    Encode(String),

    /// A payload could not be deserialized.
    #[error("cannot decode message: {0}")]
    Decode(String),
}
