//! Two-phase suspend handshake.
//!
//! ```text
//! Active --idle timer--> ShouldSuspendSent --ack--> SuspendSent --ack/grace--> Closed
//!    ^                         |                         |
//!    +-------- cancel ---------+-------------------------+
//! ```
//!
//! The functions here only inspect and update a [`BackgroundContextRecord`].
//! Sending messages, arming timers and tearing the context down are the
//! manager's job; it asks this module whether a step may proceed and records
//! the result.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::BackgroundContextRecord;
use crate::sequence::SequenceGuard;
use crate::types::ExtensionId;

/// Position of a lazy context in the suspend handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPhase {
    /// Running; no handshake in flight.
    #[default]
    Active,
    /// `ShouldSuspend` sent, waiting for the acknowledgement.
    ShouldSuspendSent,
    /// `Suspend` sent, waiting for the acknowledgement or the grace timer.
    SuspendSent,
    /// Context torn down.
    Closed,
}

impl SuspendPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::ShouldSuspendSent => "should_suspend_sent",
            Self::SuspendSent => "suspend_sent",
            Self::Closed => "closed",
        }
    }

    /// Whether a handshake is in flight and can still be canceled.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::ShouldSuspendSent | Self::SuspendSent)
    }
}

impl fmt::Display for SuspendPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directive sent to the remote runtime hosting a lazy context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum RemoteMessage {
    /// Ask whether the context is ready to suspend.
    ShouldSuspend {
        extension_id: ExtensionId,
        sequence_id: u64,
    },
    /// Tell the context it is about to be suspended.
    Suspend {
        extension_id: ExtensionId,
        sequence_id: u64,
    },
    /// Retract a previously sent `Suspend`.
    CancelSuspend { extension_id: ExtensionId },
}

impl RemoteMessage {
    #[must_use]
    pub fn extension_id(&self) -> &ExtensionId {
        match self {
            Self::ShouldSuspend { extension_id, .. }
            | Self::Suspend { extension_id, .. }
            | Self::CancelSuspend { extension_id } => extension_id,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ShouldSuspend { .. } => "should_suspend",
            Self::Suspend { .. } => "suspend",
            Self::CancelSuspend { .. } => "cancel_suspend",
        }
    }
}

/// Why a timer firing or an acknowledgement was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// No lazy context record, or the context is gone.
    NoContext,
    /// Activity arrived since the id was issued.
    SequenceMismatch,
    /// A `Suspend` is already in flight.
    AlreadyClosing,
    /// The step needs a `Suspend` in flight and there is none.
    NotClosing,
    /// Claims are outstanding.
    KeepaliveHeld,
    /// The acknowledgement answers a message that was never sent.
    Unsolicited,
}

impl StaleReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoContext => "no_context",
            Self::SequenceMismatch => "sequence_mismatch",
            Self::AlreadyClosing => "already_closing",
            Self::NotClosing => "not_closing",
            Self::KeepaliveHeld => "keepalive_held",
            Self::Unsolicited => "unsolicited",
        }
    }
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the idle timer may start the handshake.
pub fn check_idle(
    record: &BackgroundContextRecord,
    sequence_id: u64,
    has_context: bool,
) -> Result<(), StaleReason> {
    if !has_context {
        return Err(StaleReason::NoContext);
    }
    if record.is_closing {
        return Err(StaleReason::AlreadyClosing);
    }
    if !SequenceGuard::is_current(record, sequence_id) {
        return Err(StaleReason::SequenceMismatch);
    }
    if record.keepalive_count > 0 {
        return Err(StaleReason::KeepaliveHeld);
    }
    Ok(())
}

/// Whether a `ShouldSuspend` acknowledgement may advance to `Suspend`.
pub fn check_should_suspend_ack(
    record: &BackgroundContextRecord,
    sequence_id: u64,
) -> Result<(), StaleReason> {
    if !SequenceGuard::is_current(record, sequence_id) {
        return Err(StaleReason::SequenceMismatch);
    }
    if record.is_closing {
        return Err(StaleReason::AlreadyClosing);
    }
    if record.phase != SuspendPhase::ShouldSuspendSent {
        return Err(StaleReason::Unsolicited);
    }
    Ok(())
}

/// Whether a `Suspend` acknowledgement or grace expiry may tear down.
pub fn check_close(record: &BackgroundContextRecord, sequence_id: u64) -> Result<(), StaleReason> {
    if !SequenceGuard::is_current(record, sequence_id) {
        return Err(StaleReason::SequenceMismatch);
    }
    if !record.is_closing {
        return Err(StaleReason::NotClosing);
    }
    Ok(())
}

pub fn mark_should_suspend_sent(record: &mut BackgroundContextRecord) {
    record.phase = SuspendPhase::ShouldSuspendSent;
}

pub fn mark_suspend_sent(record: &mut BackgroundContextRecord) {
    record.is_closing = true;
    record.phase = SuspendPhase::SuspendSent;
}

/// Return to `Active`. Reports whether a `Suspend` had been sent, in which
/// case the remote side needs a `CancelSuspend`.
pub fn reset(record: &mut BackgroundContextRecord) -> bool {
    let was_closing = record.is_closing;
    record.is_closing = false;
    record.phase = SuspendPhase::Active;
    was_closing
}

pub fn mark_closed(record: &mut BackgroundContextRecord) {
    record.is_closing = false;
    record.phase = SuspendPhase::Closed;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_record(seq: u64) -> BackgroundContextRecord {
        BackgroundContextRecord {
            close_sequence_id: seq,
            ..Default::default()
        }
    }

    #[test]
    fn idle_check_requires_current_sequence() {
        let record = idle_record(5);
        assert_eq!(check_idle(&record, 5, true), Ok(()));
        assert_eq!(check_idle(&record, 4, true), Err(StaleReason::SequenceMismatch));
        assert_eq!(check_idle(&record, 5, false), Err(StaleReason::NoContext));
    }

    #[test]
    fn idle_check_refuses_while_closing_or_busy() {
        let mut record = idle_record(5);
        mark_suspend_sent(&mut record);
        assert_eq!(check_idle(&record, 5, true), Err(StaleReason::AlreadyClosing));

        let mut record = idle_record(5);
        record.keepalive_count = 1;
        assert_eq!(check_idle(&record, 5, true), Err(StaleReason::KeepaliveHeld));
    }

    #[test]
    fn should_suspend_ack_needs_pending_query() {
        let mut record = idle_record(3);
        assert_eq!(check_should_suspend_ack(&record, 3), Err(StaleReason::Unsolicited));
        mark_should_suspend_sent(&mut record);
        assert_eq!(check_should_suspend_ack(&record, 3), Ok(()));
        assert_eq!(
            check_should_suspend_ack(&record, 2),
            Err(StaleReason::SequenceMismatch)
        );
        mark_suspend_sent(&mut record);
        assert_eq!(
            check_should_suspend_ack(&record, 3),
            Err(StaleReason::AlreadyClosing)
        );
    }

    #[test]
    fn close_needs_suspend_in_flight() {
        let mut record = idle_record(9);
        assert_eq!(check_close(&record, 9), Err(StaleReason::NotClosing));
        mark_suspend_sent(&mut record);
        assert_eq!(check_close(&record, 9), Ok(()));
        assert_eq!(check_close(&record, 8), Err(StaleReason::SequenceMismatch));
    }

    #[test]
    fn reset_reports_whether_suspend_was_sent() {
        let mut record = idle_record(1);
        mark_should_suspend_sent(&mut record);
        assert!(!reset(&mut record));
        assert_eq!(record.phase, SuspendPhase::Active);

        mark_suspend_sent(&mut record);
        assert!(reset(&mut record));
        assert!(!record.is_closing);
    }

    #[test]
    fn remote_message_serializes_with_tag() {
        let msg = RemoteMessage::CancelSuspend {
            extension_id: ExtensionId::new("abc"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["message"], "cancel_suspend");
        assert_eq!(json["extension_id"], "abc");
        assert_eq!(msg.kind(), "cancel_suspend");
    }

    #[test]
    fn in_flight_phases() {
        assert!(!SuspendPhase::Active.is_in_flight());
        assert!(SuspendPhase::ShouldSuspendSent.is_in_flight());
        assert!(SuspendPhase::SuspendSent.is_in_flight());
        assert!(!SuspendPhase::Closed.is_in_flight());
    }
}
