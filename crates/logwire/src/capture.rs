//! Log capture.
//!
//! Bridges application `tracing` events and panics into the forwarder,
//! applying the severity policy the controller expects: errors and warnings
//! are forwarded, routine output is dropped at this entry point.

use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::forwarder::LogForwarder;
use crate::record::{LogRecord, Severity};

/// Target prefix of this crate's own diagnostics.
const SELF_TARGET: &str = "logwire";

/// Maps a `tracing` level onto the controller's severity scale.
fn classify(level: Level) -> Severity {
    if level == Level::ERROR {
        Severity::Error
    } else if level == Level::WARN {
        Severity::Warning
    } else {
        Severity::Normal
    }
}

/// Events emitted by the relay itself must never be forwarded: a send
/// failure logged at warn level would otherwise re-enter dispatch.
fn is_self_target(target: &str) -> bool {
    target == SELF_TARGET || target.starts_with("logwire::")
}

/// `tracing` layer that feeds captured events into a [`LogForwarder`].
///
/// Normal-severity events are dropped here so routine output cannot flood
/// the uplink; use [`LogForwarder::dispatch`] directly when a Normal record
/// should be sent.
pub struct ForwardLayer {
    forwarder: Arc<LogForwarder>,
    active: Arc<AtomicBool>,
}

impl<S> Layer<S> for ForwardLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }

        let metadata = event.metadata();
        if is_self_target(metadata.target()) {
            return;
        }

        let severity = classify(*metadata.level());
        if severity == Severity::Normal {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let text = format!(
            "{} {}: {}",
            metadata.level(),
            metadata.target(),
            visitor.into_text()
        );

        self.forwarder
            .dispatch(LogRecord::with_timestamp(severity, text, Utc::now()));
    }
}

/// Collects the event's message and structured fields into one line.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn into_text(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.join(" ")
        } else {
            format!("{} [{}]", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }
}

/// Deactivates capture when dropped.
///
/// A global subscriber cannot be torn down once installed, so scoped
/// release works by gating the layer and the panic hook on a shared flag.
#[must_use = "capture stops when the guard is dropped"]
pub struct CaptureGuard {
    active: Arc<AtomicBool>,
}

impl CaptureGuard {
    /// Stops forwarding immediately, without waiting for drop.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// Whether capture is still forwarding.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Builds the capture layer and the guard that deactivates it.
///
/// The layer still has to be attached to a subscriber, typically via
/// `tracing_subscriber::registry().with(layer)`.
pub fn forward_layer(forwarder: Arc<LogForwarder>) -> (ForwardLayer, CaptureGuard) {
    let active = Arc::new(AtomicBool::new(true));
    (
        ForwardLayer {
            forwarder,
            active: active.clone(),
        },
        CaptureGuard { active },
    )
}

/// Routes panics into the forwarder as Error records, then runs whatever
/// panic hook was installed before.
///
/// The record carries the panic payload, its location and a captured
/// backtrace, so a crash is the last thing the controller sees from this
/// client.
pub fn install_panic_capture(forwarder: Arc<LogForwarder>, guard: &CaptureGuard) {
    let active = guard.active.clone();
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if active.load(Ordering::Relaxed) {
            let payload = if let Some(text) = info.payload().downcast_ref::<&str>() {
                (*text).to_string()
            } else if let Some(text) = info.payload().downcast_ref::<String>() {
                text.clone()
            } else {
                "unknown panic payload".to_string()
            };
            let location = info
                .location()
                .map(|location| location.to_string())
                .unwrap_or_else(|| "unknown location".to_string());
            let backtrace = std::backtrace::Backtrace::force_capture();
            let text = format!("panic at {location}: {payload}\nstack trace:\n{backtrace}");
            forwarder.dispatch(LogRecord::with_timestamp(Severity::Error, text, Utc::now()));
        }
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayResult;
    use crate::message::ClientMessage;
    use crate::transport::LogTransport;
    use tracing_subscriber::layer::SubscriberExt;

    /// Permanently disconnected transport; everything lands in the buffer.
    struct OfflineTransport;

    impl LogTransport for OfflineTransport {
        fn is_connected(&self) -> bool {
            false
        }

        fn send(&self, _message: ClientMessage) -> RelayResult<()> {
            unreachable!("offline transport never sends")
        }
    }

    fn offline_forwarder() -> Arc<LogForwarder> {
        Arc::new(LogForwarder::new(Arc::new(OfflineTransport)))
    }

    #[test]
    fn test_classify_matches_engine_policy() {
        assert_eq!(classify(Level::ERROR), Severity::Error);
        assert_eq!(classify(Level::WARN), Severity::Warning);
        assert_eq!(classify(Level::INFO), Severity::Normal);
        assert_eq!(classify(Level::DEBUG), Severity::Normal);
        assert_eq!(classify(Level::TRACE), Severity::Normal);
    }

    #[test]
    fn test_layer_forwards_warnings_and_errors_only() {
        let forwarder = offline_forwarder();
        let (layer, _guard) = forward_layer(forwarder.clone());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("routine");
            tracing::warn!("low disk");
            tracing::error!("crash");
        });

        let records = forwarder.buffer().get_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].severity, Severity::Warning);
        assert!(records[0].message.contains("low disk"));
        assert_eq!(records[1].severity, Severity::Error);
        assert!(records[1].message.contains("crash"));
        assert!(records.iter().all(|record| record.timestamp.is_some()));
    }

    #[test]
    fn test_layer_skips_own_diagnostics() {
        let forwarder = offline_forwarder();
        let (layer, _guard) = forward_layer(forwarder.clone());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "logwire::forwarder", "internal");
            tracing::warn!(target: "logwire", "internal");
            tracing::warn!(target: "logwire_app", "application");
        });

        let records = forwarder.buffer().get_all();
        assert_eq!(records.len(), 1);
        assert!(records[0].message.contains("application"));
    }

    #[test]
    fn test_structured_fields_land_in_the_text() {
        let forwarder = offline_forwarder();
        let (layer, _guard) = forward_layer(forwarder.clone());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(disk = "sda1", free_mb = 12, "running low");
        });

        let records = forwarder.buffer().get_all();
        assert_eq!(records.len(), 1);
        assert!(records[0].message.contains("running low"));
        assert!(records[0].message.contains("disk=sda1"));
        assert!(records[0].message.contains("free_mb=12"));
    }

    #[test]
    fn test_guard_stops_capture() {
        let forwarder = offline_forwarder();
        let (layer, guard) = forward_layer(forwarder.clone());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("before");
            guard.deactivate();
            tracing::error!("after");
        });

        let records = forwarder.buffer().get_all();
        assert_eq!(records.len(), 1);
        assert!(records[0].message.contains("before"));
        assert!(!guard.is_active());
    }

    #[test]
    fn test_dropping_the_guard_stops_capture() {
        let forwarder = offline_forwarder();
        let (layer, guard) = forward_layer(forwarder.clone());
        let subscriber = tracing_subscriber::registry().with(layer);

        drop(guard);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("never forwarded");
        });

        assert!(forwarder.buffer().is_empty());
    }

    #[test]
    fn test_panic_hook_records_the_panic() {
        let forwarder = offline_forwarder();
        let (_, guard) = forward_layer(forwarder.clone());
        install_panic_capture(forwarder.clone(), &guard);

        let result = std::panic::catch_unwind(|| {
            panic!("boom");
        });
        assert!(result.is_err());

        // Remove the hook again so other tests observe default behavior.
        let _ = panic::take_hook();

        let records = forwarder.buffer().get_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Error);
        assert!(records[0].message.contains("panic at"));
        assert!(records[0].message.contains("boom"));
        assert!(records[0].message.contains("stack trace"));
    }
}
