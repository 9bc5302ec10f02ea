//! Log dispatch.
//!
//! Decides per record whether to transmit immediately or hold it in the
//! pending buffer, and drains the buffer when a connection comes up.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::buffer::PendingLogBuffer;
use crate::connection::ConnectionEvent;
use crate::error::RelayResult;
use crate::message::{truncate_message, ClientMessage};
use crate::record::{LogRecord, Severity};
use crate::transport::LogTransport;

/// Routes captured log records to the controller.
///
/// Owns the pending buffer and receives its transport at construction.
/// Dispatch is fire-and-forget end to end: no call here reports delivery
/// problems back to the logging site.
pub struct LogForwarder {
    transport: Arc<dyn LogTransport>,
    buffer: PendingLogBuffer,
}

impl LogForwarder {
    pub fn new(transport: Arc<dyn LogTransport>) -> Self {
        Self {
            transport,
            buffer: PendingLogBuffer::new(),
        }
    }

    /// The buffer of records held while disconnected.
    pub fn buffer(&self) -> &PendingLogBuffer {
        &self.buffer
    }

    /// Routes one record: buffered while disconnected, transmitted while
    /// connected. No severity filtering happens here.
    pub fn dispatch(&self, record: LogRecord) {
        if !self.transport.is_connected() {
            self.buffer.add(record);
            return;
        }
        if let Err(err) = self.send_record(&record) {
            // The connection can drop between the check and the send; the
            // record goes back to the buffer for the next flush.
            debug!("send failed, record re-buffered: {}", err);
            self.buffer.add(record);
        }
    }

    /// Dispatches a record built from its parts, without a timestamp.
    pub fn dispatch_message(&self, severity: Severity, message: impl Into<String>) {
        self.dispatch(LogRecord::new(severity, message));
    }

    /// Dispatches a Normal-severity message.
    pub fn dispatch_normal(&self, message: impl Into<String>) {
        self.dispatch_message(Severity::Normal, message);
    }

    /// Drains the pending buffer to the transport in insertion order and
    /// returns how many records were delivered.
    ///
    /// When a send fails, the failed record and everything behind it go
    /// back to the front of the buffer for the next flush.
    pub fn flush_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            // Records dispatched between iterations land in a fresh vec,
            // so looping until the buffer stays empty drains stragglers.
            let records = self.buffer.take_all();
            if records.is_empty() {
                break;
            }
            let mut pending = records.into_iter();
            while let Some(record) = pending.next() {
                if let Err(err) = self.send_record(&record) {
                    warn!("flush interrupted, re-buffering undelivered records: {}", err);
                    let mut rest = vec![record];
                    rest.extend(pending);
                    self.buffer.restore_front(rest);
                    return delivered;
                }
                delivered += 1;
            }
        }
        delivered
    }

    /// Applies one connection lifecycle event.
    ///
    /// Establishment flushes the backlog and then announces this client;
    /// every other event is observed and swallowed so the process keeps
    /// running (and buffering) no matter what the connection does.
    pub fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { remote_address } => {
                debug!("connected to {}, flushing pending records", remote_address);
                let delivered = self.flush_pending();
                if delivered > 0 {
                    debug!("flushed {} pending records", delivered);
                }
                if let Err(err) = self.transport.send(ClientMessage::Announce) {
                    debug!("announce failed: {}", err);
                }
            }
            ConnectionEvent::ConnectionFailed { error } => {
                debug!("connection attempt failed: {}", error);
            }
            ConnectionEvent::Disconnected { reason } => {
                debug!("disconnected ({}), new records will buffer", reason);
            }
            ConnectionEvent::ClientDisconnected { client_id } => {
                debug!("client {} left the controller", client_id);
            }
        }
    }

    /// Event loop: applies connection events until the channel closes.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<ConnectionEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("connection event stream lagged, {} events missed", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn send_record(&self, record: &LogRecord) -> RelayResult<()> {
        // Text is clamped to frame size at this seam; the buffer keeps
        // the full text.
        self.transport.send(ClientMessage::Log {
            severity: record.severity,
            message: truncate_message(record.message.clone()),
        })
    }
}
