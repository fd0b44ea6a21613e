//! Close sequence ids.
//!
//! Every idle period gets a fresh id from one global counter. Timers and
//! remote acknowledgements carry the id they were issued under; they only
//! take effect while it still equals the extension's `close_sequence_id`.

use crate::ledger::BackgroundContextRecord;

/// Issues close sequence ids.
#[derive(Debug, Default, Clone)]
pub struct SequenceGuard {
    last: u64,
}

impl SequenceGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id. Wraps instead of overflowing; ids are only ever
    /// compared for equality.
    pub fn next(&mut self) -> u64 {
        self.last = self.last.wrapping_add(1);
        self.last
    }

    /// Start a new idle period for `record` and return its id.
    pub fn issue(&mut self, record: &mut BackgroundContextRecord) -> u64 {
        let id = self.next();
        record.close_sequence_id = id;
        id
    }

    /// Invalidate outstanding timers and acks after a 0 -> 1 transition.
    ///
    /// Skipped while closing: the suspend cancellation path issues its own
    /// id through a synthetic claim.
    pub fn on_became_active(&mut self, record: &mut BackgroundContextRecord) -> bool {
        if record.is_closing {
            return false;
        }
        self.issue(record);
        true
    }

    /// Whether `sequence_id` still names the current idle period.
    #[must_use]
    pub fn is_current(record: &BackgroundContextRecord, sequence_id: u64) -> bool {
        record.close_sequence_id == sequence_id
    }

    /// Most recently issued id.
    #[must_use]
    pub fn last_issued(&self) -> u64 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_fresh() {
        let mut guard = SequenceGuard::new();
        let a = guard.next();
        let b = guard.next();
        assert_ne!(a, b);
        assert_eq!(guard.last_issued(), b);
    }

    #[test]
    fn becoming_active_invalidates_captured_id() {
        let mut guard = SequenceGuard::new();
        let mut record = BackgroundContextRecord::default();
        let captured = guard.issue(&mut record);
        assert!(SequenceGuard::is_current(&record, captured));

        assert!(guard.on_became_active(&mut record));
        assert!(!SequenceGuard::is_current(&record, captured));
    }

    #[test]
    fn becoming_active_while_closing_keeps_id() {
        let mut guard = SequenceGuard::new();
        let mut record = BackgroundContextRecord::default();
        let captured = guard.issue(&mut record);
        record.is_closing = true;
        assert!(!guard.on_became_active(&mut record));
        assert!(SequenceGuard::is_current(&record, captured));
    }

    #[test]
    fn wraparound_is_harmless() {
        let mut guard = SequenceGuard { last: u64::MAX };
        let mut record = BackgroundContextRecord {
            close_sequence_id: u64::MAX,
            ..Default::default()
        };
        let id = guard.issue(&mut record);
        assert_eq!(id, 0);
        assert!(!SequenceGuard::is_current(&record, u64::MAX));
        assert!(SequenceGuard::is_current(&record, 0));
    }
}
