//! Connection state management.
//!
//! Tracks the lifecycle of the single uplink connection and fans lifecycle
//! events out to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};

/// Capacity of the event channel. Subscribers that fall further behind
/// than this observe a lag error instead of stale events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connection established.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Lifecycle events emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection established.
    Connected { remote_address: String },
    /// The outbound connection attempt failed.
    ConnectionFailed { error: String },
    /// Connection lost, locally or remotely.
    Disconnected { reason: String },
    /// Another client left the controller.
    ClientDisconnected { client_id: u16 },
}

/// Counters shared between handles.
#[derive(Debug, Default)]
struct ConnectionStats {
    records_sent: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Snapshot of the current connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub remote_address: Option<String>,
    pub connected_at: Option<Instant>,
    pub records_sent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Tracks connection state and distributes lifecycle events.
///
/// Cloning produces another handle onto the same state; the transport
/// drives transitions and everything else observes them.
pub struct ConnectionManager {
    state: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    stats: Arc<ConnectionStats>,
    remote_address: Arc<RwLock<Option<String>>>,
    connected_at: Arc<RwLock<Option<Instant>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(state),
            state_rx,
            events,
            stats: Arc::new(ConnectionStats::default()),
            remote_address: Arc::new(RwLock::new(None)),
            connected_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether an active connection exists right now.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribes to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribes to lifecycle events. Only events emitted after the call
    /// are delivered.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Marks the start of a connection attempt.
    pub fn set_connecting(&self) {
        let _ = self.state.send(ConnectionState::Connecting);
    }

    /// Marks the connection as established and emits `Connected`.
    pub fn set_connected(&self, remote_address: String) {
        *self.remote_address.write() = Some(remote_address.clone());
        *self.connected_at.write() = Some(Instant::now());
        let _ = self.state.send(ConnectionState::Connected);
        let _ = self.events.send(ConnectionEvent::Connected { remote_address });
    }

    /// Marks a failed connection attempt and emits `ConnectionFailed`.
    pub fn set_connection_failed(&self, error: String) {
        let _ = self.state.send(ConnectionState::Disconnected);
        let _ = self.events.send(ConnectionEvent::ConnectionFailed { error });
    }

    /// Marks the connection as gone and emits `Disconnected`.
    pub fn set_disconnected(&self, reason: String) {
        *self.remote_address.write() = None;
        *self.connected_at.write() = None;
        let _ = self.state.send(ConnectionState::Disconnected);
        let _ = self.events.send(ConnectionEvent::Disconnected { reason });
    }

    /// Emits `ClientDisconnected` for a peer leaving the controller.
    pub fn notify_client_disconnected(&self, client_id: u16) {
        let _ = self
            .events
            .send(ConnectionEvent::ClientDisconnected { client_id });
    }

    /// Records one delivered log record of the given encoded size.
    /// Control frames are not counted.
    pub fn record_sent(&self, bytes: u64) {
        self.stats.records_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records bytes received from the controller.
    pub fn record_received(&self, bytes: u64) {
        self.stats.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Snapshot of state and counters.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            state: self.state(),
            remote_address: self.remote_address.read().clone(),
            connected_at: *self.connected_at.read(),
            records_sent: self.stats.records_sent.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            state_rx: self.state_rx.clone(),
            events: self.events.clone(),
            stats: self.stats.clone(),
            remote_address: self.remote_address.clone(),
            connected_at: self.connected_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_transitions() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());

        manager.set_connecting();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.is_connected());

        manager.set_connected("127.0.0.1:4433".to_string());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.is_connected());

        manager.set_disconnected("test".to_string());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_failed_attempt_returns_to_disconnected() {
        let manager = ConnectionManager::new();
        manager.set_connecting();
        manager.set_connection_failed("refused".to_string());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_subscription_sees_latest_state() {
        let manager = ConnectionManager::new();
        let subscription = manager.subscribe_state();
        assert_eq!(*subscription.borrow(), ConnectionState::Disconnected);

        manager.set_connecting();
        manager.set_connected("127.0.0.1:4433".to_string());
        assert_eq!(*subscription.borrow(), ConnectionState::Connected);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
    }

    #[test]
    fn test_events_are_delivered_in_order() {
        let manager = ConnectionManager::new();
        let mut events = manager.subscribe_events();

        manager.set_connected("10.0.0.1:4433".to_string());
        manager.set_disconnected("stream ended".to_string());
        manager.notify_client_disconnected(3);

        assert!(matches!(
            events.try_recv(),
            Ok(ConnectionEvent::Connected { remote_address }) if remote_address == "10.0.0.1:4433"
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(ConnectionEvent::Disconnected { reason }) if reason == "stream ended"
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(ConnectionEvent::ClientDisconnected { client_id: 3 })
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_subscribers_miss_earlier_events() {
        let manager = ConnectionManager::new();
        manager.set_connected("10.0.0.1:4433".to_string());

        let mut events = manager.subscribe_events();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stats_recording() {
        let manager = ConnectionManager::new();
        manager.record_sent(100);
        manager.record_sent(50);
        manager.record_received(25);

        let info = manager.info();
        assert_eq!(info.records_sent, 2);
        assert_eq!(info.bytes_sent, 150);
        assert_eq!(info.bytes_received, 25);
    }

    #[test]
    fn test_info_tracks_remote_address_lifecycle() {
        let manager = ConnectionManager::new();
        assert!(manager.info().remote_address.is_none());

        manager.set_connected("10.0.0.1:4433".to_string());
        let info = manager.info();
        assert_eq!(info.remote_address.as_deref(), Some("10.0.0.1:4433"));
        assert!(info.connected_at.is_some());

        manager.set_disconnected("done".to_string());
        let info = manager.info();
        assert!(info.remote_address.is_none());
        assert!(info.connected_at.is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let manager = ConnectionManager::new();
        let other = manager.clone();
        manager.set_connected("10.0.0.1:4433".to_string());
        assert!(other.is_connected());
    }
}
