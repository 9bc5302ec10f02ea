//! Pending-log buffer.
//!
//! Records dispatched while no connection exists are held here until the
//! next successful flush.

use parking_lot::Mutex;

use crate::record::LogRecord;

/// Ordered buffer of not-yet-delivered log records.
///
/// Insertion order is preserved across every operation. Capture callbacks
/// can run on any thread, so the contents sit behind a mutex; all
/// operations are brief and never block on IO.
#[derive(Debug, Default)]
pub struct PendingLogBuffer {
    records: Mutex<Vec<LogRecord>>,
}

impl PendingLogBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record at the end.
    pub fn add(&self, record: LogRecord) {
        self.records.lock().push(record);
    }

    /// Returns the buffered records in insertion order without removing them.
    pub fn get_all(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Removes all buffered records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the buffer holds nothing.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Swaps the contents out in a single step so a drain cannot interleave
    /// with concurrent appends.
    pub fn take_all(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Reinserts records ahead of anything appended since the matching
    /// [`take_all`](Self::take_all).
    pub fn restore_front(&self, records: Vec<LogRecord>) {
        if records.is_empty() {
            return;
        }
        let mut guard = self.records.lock();
        let newer = std::mem::replace(&mut *guard, records);
        guard.extend(newer);
    }
}
