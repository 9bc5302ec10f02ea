//! WebTransport uplink.
//!
//! Concrete [`LogTransport`] backed by `wtransport`. One bidirectional
//! stream carries length-prefixed frames in both directions; a spawned
//! driver task owns the socket so `send` stays synchronous and cheap.
//!
//! Enable with the `webtransport` feature.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use wtransport::{ClientConfig, Connection, Endpoint, RecvStream, SendStream};

use crate::connection::ConnectionManager;
use crate::error::{RelayError, RelayResult};
use crate::message::{
    decode_frame_len, ClientMessage, ServerMessage, FRAME_HEADER_LEN, MAX_FRAME_LEN,
};
use crate::transport::{LogTransport, TransportConfig};

/// Client end of the log uplink.
///
/// Created disconnected; [`connect`](Self::connect) makes the single
/// outbound attempt. Messages handed to [`LogTransport::send`] are queued
/// to the driver task, which performs all socket IO.
pub struct WebTransportClient {
    manager: ConnectionManager,
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl WebTransportClient {
    /// Creates a disconnected client bound to its connection manager.
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            outgoing: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    /// Attempts the single outbound connection.
    ///
    /// On success the driver task is spawned and `Connected` is emitted;
    /// on failure `ConnectionFailed` is emitted and the client stays
    /// disconnected. There is no retry.
    pub async fn connect(&self, config: &TransportConfig) -> RelayResult<()> {
        self.manager.set_connecting();

        let connection = match open_connection(config).await {
            Ok(connection) => connection,
            Err(err) => {
                self.manager.set_connection_failed(err.to_string());
                return Err(err);
            }
        };

        let (send_stream, recv_stream) = match open_log_stream(&connection).await {
            Ok(streams) => streams,
            Err(err) => {
                self.manager.set_connection_failed(err.to_string());
                return Err(err);
            }
        };

        let remote_address = connection.remote_address().to_string();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.outgoing.lock() = Some(outgoing_tx);
        *self.shutdown.lock() = Some(shutdown_tx);

        // State first, then the spawn: subscribers reacting to Connected
        // must observe an is_connected() transport, and anything they send
        // queues until the driver picks it up.
        self.manager.set_connected(remote_address);

        tokio::spawn(drive_connection(
            connection,
            send_stream,
            recv_stream,
            outgoing_rx,
            shutdown_rx,
            self.manager.clone(),
        ));

        Ok(())
    }

    /// Gracefully closes the uplink.
    pub fn disconnect(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
    }

    /// The connection manager driven by this client.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl LogTransport for WebTransportClient {
    fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    fn send(&self, message: ClientMessage) -> RelayResult<()> {
        if !self.manager.is_connected() {
            return Err(RelayError::NotConnected);
        }
        let guard = self.outgoing.lock();
        let sender = guard.as_ref().ok_or(RelayError::NotConnected)?;
        sender
            .send(message)
            .map_err(|_| RelayError::SendFailed("connection task is gone".to_string()))
    }
}

async fn open_connection(config: &TransportConfig) -> RelayResult<Connection> {
    let client_config = if config.allow_insecure {
        ClientConfig::builder()
            .with_bind_default()
            .with_no_cert_validation()
            .build()
    } else {
        ClientConfig::builder()
            .with_bind_default()
            .with_native_certs()
            .build()
    };

    let endpoint = Endpoint::client(client_config)
        .map_err(|err| RelayError::ConnectionFailed(format!("endpoint setup: {err}")))?;

    let url = config.url();
    tokio::time::timeout(
        Duration::from_millis(config.connect_timeout_ms),
        endpoint.connect(&url),
    )
    .await
    .map_err(|_| RelayError::Timeout)?
    .map_err(|err| RelayError::ConnectionFailed(err.to_string()))
}

async fn open_log_stream(connection: &Connection) -> RelayResult<(SendStream, RecvStream)> {
    let opening = connection
        .open_bi()
        .await
        .map_err(|err| RelayError::ConnectionFailed(format!("open stream: {err}")))?;
    opening
        .await
        .map_err(|err| RelayError::ConnectionFailed(format!("open stream: {err}")))
}

/// Owns the socket for the lifetime of one connection. Ends when either
/// direction fails or a shutdown is requested, then reports Disconnected.
async fn drive_connection(
    connection: Connection,
    mut send_stream: SendStream,
    mut recv_stream: RecvStream,
    mut outgoing: mpsc::UnboundedReceiver<ClientMessage>,
    shutdown: oneshot::Receiver<()>,
    manager: ConnectionManager,
) {
    let reason = tokio::select! {
        reason = writer_loop(&mut send_stream, &mut outgoing, shutdown, &manager) => reason,
        reason = reader_loop(&mut recv_stream, &manager) => reason,
    };

    tracing::debug!(
        "uplink to {} closed: {}",
        connection.remote_address(),
        reason
    );
    manager.set_disconnected(reason);
}

async fn writer_loop(
    send_stream: &mut SendStream,
    outgoing: &mut mpsc::UnboundedReceiver<ClientMessage>,
    mut shutdown: oneshot::Receiver<()>,
    manager: &ConnectionManager,
) -> String {
    loop {
        tokio::select! {
            queued = outgoing.recv() => match queued {
                Some(message) => {
                    // Control frames like Announce stay out of the
                    // delivered-record counters.
                    let is_record = message.is_log();
                    let frame = message.encode();
                    if frame.len() > MAX_FRAME_LEN {
                        tracing::warn!("discarding oversized {} byte frame", frame.len());
                    } else if let Err(err) = write_frame(send_stream, &frame).await {
                        return format!("write failed: {err}");
                    } else if is_record {
                        manager.record_sent((FRAME_HEADER_LEN + frame.len()) as u64);
                    }
                }
                None => return "uplink handle dropped".to_string(),
            },
            _ = &mut shutdown => {
                let _ = send_stream.finish().await;
                return "client disconnect".to_string();
            }
        }
    }
}

async fn reader_loop(recv_stream: &mut RecvStream, manager: &ConnectionManager) -> String {
    loop {
        match read_frame(recv_stream).await {
            Ok(frame) => {
                manager.record_received((FRAME_HEADER_LEN + frame.len()) as u64);
                match ServerMessage::decode(&frame) {
                    Ok(ServerMessage::Notice { text }) => {
                        tracing::debug!("controller notice: {}", text);
                    }
                    Err(err) => {
                        // Malformed frames are skipped, not fatal.
                        tracing::warn!("discarding undecodable controller frame: {}", err);
                    }
                }
            }
            Err(err) => return format!("read failed: {err}"),
        }
    }
}

/// Writes one u32 length prefix followed by the frame bytes.
async fn write_frame(stream: &mut SendStream, frame: &[u8]) -> RelayResult<()> {
    let len = (frame.len() as u32).to_be_bytes();
    stream
        .write_all(&len)
        .await
        .map_err(|err| RelayError::SendFailed(err.to_string()))?;
    stream
        .write_all(frame)
        .await
        .map_err(|err| RelayError::SendFailed(err.to_string()))?;
    Ok(())
}

/// Reads one length-prefixed frame, rejecting oversized prefixes before
/// allocating.
async fn read_frame(stream: &mut RecvStream) -> RelayResult<Vec<u8>> {
    let mut len_buf = [0u8; FRAME_HEADER_LEN];
    read_exact(stream, &mut len_buf).await?;
    let len = decode_frame_len(len_buf)?;
    let mut frame = vec![0u8; len];
    read_exact(stream, &mut frame).await?;
    Ok(frame)
}

async fn read_exact(stream: &mut RecvStream, buf: &mut [u8]) -> RelayResult<()> {
    let mut offset = 0;
    while offset < buf.len() {
        match stream
            .read(&mut buf[offset..])
            .await
            .map_err(|err| RelayError::ConnectionClosed(err.to_string()))?
        {
            Some(0) | None => {
                return Err(RelayError::ConnectionClosed("stream ended".to_string()))
            }
            Some(read) => offset += read,
        }
    }
    Ok(())
}
