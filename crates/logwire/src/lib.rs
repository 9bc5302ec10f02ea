//! Buffered log forwarding over a WebTransport uplink.
//!
//! Captures application log events, classifies their severity and relays
//! them to a remote controller. While no connection exists, records queue
//! in an in-memory buffer; when the connection comes up, the backlog is
//! flushed in order before anything else is sent. Delivery is
//! fire-and-forget throughout: logging never blocks and never surfaces
//! transport errors to the caller.
//!
//! The pieces:
//! - [`capture`]: a `tracing` layer and panic hook feeding the forwarder
//! - [`forwarder`]: dispatch, buffering and flush-on-connect
//! - [`buffer`]: the ordered pending-record buffer
//! - [`connection`]: connection state and lifecycle events
//! - [`message`]: the wire codec shared with the controller
//! - [`webtransport`]: the production transport (feature `webtransport`)

pub mod buffer;
pub mod capture;
pub mod connection;
pub mod error;
pub mod forwarder;
pub mod message;
pub mod record;
pub mod transport;

#[cfg(feature = "webtransport")]
pub mod webtransport;

pub use buffer::PendingLogBuffer;
pub use capture::{forward_layer, install_panic_capture, CaptureGuard, ForwardLayer};
pub use connection::{ConnectionEvent, ConnectionInfo, ConnectionManager, ConnectionState};
pub use error::{RelayError, RelayResult};
pub use forwarder::LogForwarder;
pub use message::{
    ClientMessage, ClientMessageId, ServerMessage, ServerMessageId, MAX_FRAME_LEN,
    MAX_MESSAGE_LEN, TRUNCATION_MARKER,
};
pub use record::{LogRecord, Severity};
pub use transport::{LogTransport, TransportConfig};

#[cfg(feature = "webtransport")]
pub use webtransport::WebTransportClient;
