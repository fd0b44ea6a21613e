//! Delayed tasks and the clock they run on.
//!
//! Timers never call into the manager themselves. They are posted as
//! [`ScheduledTask`] values and handed back to
//! [`LifecycleManager::run_task`](crate::manager::LifecycleManager::run_task)
//! when due, so every re-entry happens on the manager's own thread and is
//! re-validated against the current sequence id.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::types::ExtensionId;

/// Work the manager posts to itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum ScheduledTask {
    /// The idle delay elapsed for the idle period `sequence_id`.
    IdleCheck {
        extension_id: ExtensionId,
        sequence_id: u64,
    },
    /// The grace period after `Suspend` elapsed.
    SuspendGrace {
        extension_id: ExtensionId,
        sequence_id: u64,
    },
}

impl ScheduledTask {
    #[must_use]
    pub fn extension_id(&self) -> &ExtensionId {
        match self {
            Self::IdleCheck { extension_id, .. } | Self::SuspendGrace { extension_id, .. } => {
                extension_id
            }
        }
    }

    #[must_use]
    pub const fn sequence_id(&self) -> u64 {
        match self {
            Self::IdleCheck { sequence_id, .. } | Self::SuspendGrace { sequence_id, .. } => {
                *sequence_id
            }
        }
    }
}

/// Runs [`ScheduledTask`]s after a delay.
pub trait TaskScheduler: Send {
    fn post_delayed(&mut self, delay: Duration, task: ScheduledTask);

    /// Time since the scheduler's epoch.
    fn now(&self) -> Duration;
}

// =============================================================================
// Manual scheduler
// =============================================================================

#[derive(Debug, Default)]
struct VirtualClock {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<(Duration, u64), ScheduledTask>,
}

/// Deterministic scheduler driven by an explicit virtual clock.
///
/// Clones share one clock and queue: hand one clone to the manager and keep
/// another to advance time. Tasks due at the same instant run in posting
/// order.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<VirtualClock>>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VirtualClock> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the earliest task due at or before `deadline`, moving the clock to
    /// its due time.
    pub fn pop_due(&self, deadline: Duration) -> Option<ScheduledTask> {
        let mut clock = self.lock();
        let key = *clock.queue.keys().next()?;
        if key.0 > deadline {
            return None;
        }
        let task = clock.queue.remove(&key)?;
        clock.now = clock.now.max(key.0);
        Some(task)
    }

    /// Move the clock forward to `at`. Never moves backwards.
    pub fn set_now(&self, at: Duration) {
        let mut clock = self.lock();
        clock.now = clock.now.max(at);
    }

    /// Queued tasks with their due times, earliest first.
    #[must_use]
    pub fn pending(&self) -> Vec<(Duration, ScheduledTask)> {
        self.lock()
            .queue
            .iter()
            .map(|((due, _), task)| (*due, task.clone()))
            .collect()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().queue.len()
    }
}

impl TaskScheduler for ManualScheduler {
    fn post_delayed(&mut self, delay: Duration, task: ScheduledTask) {
        let mut clock = self.lock();
        let due = clock.now + delay;
        let seq = clock.next_seq;
        clock.next_seq += 1;
        clock.queue.insert((due, seq), task);
    }

    fn now(&self) -> Duration {
        self.lock().now
    }
}
