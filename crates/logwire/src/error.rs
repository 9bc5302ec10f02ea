//! Error types for the log relay.

use thiserror::Error;

/// Errors produced by the relay and its transports.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection ended while in use.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// No active connection to send on.
    #[error("not connected")]
    NotConnected,

    /// Message could not be handed to the connection.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Connection attempt timed out.
    #[error("connection timeout")]
    Timeout,

    /// Incoming frame did not parse.
    #[error("decode error: {0}")]
    Decode(String),

    /// Frame length prefix exceeds the allowed maximum.
    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
}

/// Result alias used throughout the relay.
pub type RelayResult<T> = Result<T, RelayError>;
