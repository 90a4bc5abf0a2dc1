//! Error types
//!
//! Failures are grouped by how far they reach:
//!
//! - **Framing** ([`ProtocolError`]): a bad header or truncated packet. Fatal
//!   to the one connection it happened on.
//! - **Transport** ([`Error::Io`], [`Error::Timeout`], [`Error::ConnectionClosed`]):
//!   fatal to the one connection.
//! - **Listener** ([`Error::Bind`], [`Error::Accept`]): fatal to the whole
//!   producer session.

use std::net::SocketAddr;

/// Wire-level decode failures
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The stream closed before a complete header or payload arrived
    #[error("end of stream")]
    EndOfStream,

    /// The header declared a payload length outside `1..=MAX_PAYLOAD_SIZE`
    #[error("invalid framing: declared payload length {length}")]
    InvalidFraming { length: i64 },

    /// A well-framed packet carried an unknown kind byte
    #[error("unknown packet kind: {0}")]
    UnknownKind(u8),
}

/// Crate error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated packet
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The operation was interrupted by a stop or disconnect request
    #[error("operation cancelled")]
    Cancelled,

    /// A socket operation exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// The connection is closing or closed
    #[error("connection closed")]
    ConnectionClosed,

    /// The viewer has no open connection
    #[error("not connected")]
    NotConnected,

    /// The viewer already has an open connection
    #[error("already connected")]
    AlreadyConnected,

    /// The producer is not streaming
    #[error("not streaming")]
    NotStreaming,

    /// The frame queue is full and the frame was dropped
    #[error("frame queue full")]
    QueueFull,

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the connection this error occurred on must be torn down.
    ///
    /// Unknown packet kinds leave the framing intact, so they are not fatal.
    pub fn is_fatal_for_connection(&self) -> bool {
        !matches!(
            self,
            Error::Protocol(ProtocolError::UnknownKind(_))
                | Error::QueueFull
                | Error::InvalidConfig(_)
        )
    }
}

/// Result alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_is_not_fatal() {
        let err = Error::from(ProtocolError::UnknownKind(7));
        assert!(!err.is_fatal_for_connection());
    }

    #[test]
    fn test_framing_and_transport_errors_are_fatal() {
        assert!(Error::from(ProtocolError::InvalidFraming { length: 0 }).is_fatal_for_connection());
        assert!(Error::from(ProtocolError::EndOfStream).is_fatal_for_connection());
        assert!(Error::Timeout.is_fatal_for_connection());
        assert!(Error::Cancelled.is_fatal_for_connection());
    }

    #[test]
    fn test_display_includes_length() {
        let err = Error::from(ProtocolError::InvalidFraming { length: -1 });
        assert_eq!(err.to_string(), "protocol error: invalid framing: declared payload length -1");
    }
}
