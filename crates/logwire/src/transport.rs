//! Transport abstraction.
//!
//! The forwarder talks to the network through this trait so the wire
//! implementation can be swapped: WebTransport in production, a recording
//! fake in tests.

use crate::error::RelayResult;
use crate::message::ClientMessage;

/// A connection capable of carrying client messages to the controller.
///
/// `send` is fire-and-forget: `Ok` means the message was accepted for
/// transmission, not that the controller received it.
pub trait LogTransport: Send + Sync {
    /// Whether an active connection exists right now.
    fn is_connected(&self) -> bool;

    /// Hands one message to the connection for reliable delivery.
    fn send(&self, message: ClientMessage) -> RelayResult<()>;
}

/// Settings for the single outbound connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Controller host name or IP address.
    pub server_address: String,
    /// Controller port.
    pub port: u16,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Skip certificate validation (development only).
    pub allow_insecure: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            port: 4433,
            connect_timeout_ms: 10_000,
            allow_insecure: false,
        }
    }
}

impl TransportConfig {
    /// URL of the WebTransport endpoint.
    pub fn url(&self) -> String {
        format!("https://{}:{}", self.server_address, self.port)
    }
}
