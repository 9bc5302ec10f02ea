//! Log record model.

use chrono::{DateTime, Utc};

/// Severity of a captured log event.
///
/// The discriminants are the wire values the controller expects and must not
/// be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Severity {
    /// Routine output.
    Normal = 0,
    /// Something suspicious but recoverable.
    Warning = 1,
    /// Errors, exceptions and panics.
    Error = 2,
}

impl Severity {
    /// Wire representation (4-byte signed integer).
    pub fn as_wire(self) -> i32 {
        self as i32
    }

    /// Parses the wire representation. Unknown values return `None`.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Warning),
            2 => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Normal => write!(f, "Normal"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

/// A single log event on its way to the controller.
///
/// Records are immutable once created. The timestamp is local bookkeeping
/// only and is never transmitted; capture stamps it, direct construction
/// leaves it unset.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub severity: Severity,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogRecord {
    /// Creates a record without a timestamp.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            timestamp: None,
        }
    }

    /// Creates a record stamped with its capture time.
    pub fn with_timestamp(
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            timestamp: Some(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values_are_stable() {
        assert_eq!(Severity::Normal.as_wire(), 0);
        assert_eq!(Severity::Warning.as_wire(), 1);
        assert_eq!(Severity::Error.as_wire(), 2);
    }

    #[test]
    fn test_from_wire_rejects_unknown_values() {
        assert_eq!(Severity::from_wire(0), Some(Severity::Normal));
        assert_eq!(Severity::from_wire(1), Some(Severity::Warning));
        assert_eq!(Severity::from_wire(2), Some(Severity::Error));
        assert_eq!(Severity::from_wire(3), None);
        assert_eq!(Severity::from_wire(-1), None);
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Normal.to_string(), "Normal");
        assert_eq!(Severity::Warning.to_string(), "Warning");
        assert_eq!(Severity::Error.to_string(), "Error");
    }

    #[test]
    fn test_new_record_has_no_timestamp() {
        let record = LogRecord::new(Severity::Warning, "low disk");
        assert_eq!(record.severity, Severity::Warning);
        assert_eq!(record.message, "low disk");
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn test_with_timestamp_keeps_the_stamp() {
        let now = Utc::now();
        let record = LogRecord::with_timestamp(Severity::Error, "crash", now);
        assert_eq!(record.timestamp, Some(now));
    }
}
