//! Recording collaborators and a deterministic test rig.
//!
//! Every fake shares its state through an `Arc<Mutex<..>>`, so the copy
//! boxed into the manager and the copy kept by the test see the same
//! recording. Used by unit tests, the integration tests and scenario replay.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::config::LifecycleConfig;
use crate::host::{ContextHost, RemoteRuntime, RemoteUnavailable, WorkerRuntime};
use crate::manager::{Collaborators, LifecycleManager};
use crate::observer::{LifecycleEvent, LifecycleObserver};
use crate::scheduler::ManualScheduler;
use crate::suspend::RemoteMessage;
use crate::types::{
    ContextInstanceId, ExtensionId, ExternalRequestResult, RequestToken, TimeoutPolicy, ViewId,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Remote runtime
// =============================================================================

#[derive(Debug)]
struct RemoteState {
    messages: Vec<RemoteMessage>,
    available: bool,
}

/// Remote runtime that records every delivered message.
#[derive(Debug, Clone)]
pub struct RecordingRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl Default for RecordingRemote {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                messages: Vec::new(),
                available: true,
            })),
        }
    }
}

impl RecordingRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<RemoteMessage> {
        lock(&self.state).messages.clone()
    }

    pub fn take_messages(&self) -> Vec<RemoteMessage> {
        std::mem::take(&mut lock(&self.state).messages)
    }

    /// While unavailable every send fails with [`RemoteUnavailable`] and
    /// nothing is recorded.
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    /// Number of delivered messages of `kind` (`should_suspend`, `suspend`,
    /// `cancel_suspend`).
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        lock(&self.state)
            .messages
            .iter()
            .filter(|message| message.kind() == kind)
            .count()
    }
}

impl RemoteRuntime for RecordingRemote {
    fn send(&mut self, message: RemoteMessage) -> Result<(), RemoteUnavailable> {
        let mut state = lock(&self.state);
        if !state.available {
            return Err(RemoteUnavailable);
        }
        state.messages.push(message);
        Ok(())
    }
}

// =============================================================================
// Context host
// =============================================================================

/// A call made on [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum HostCall {
    Create {
        extension_id: ExtensionId,
        instance: ContextInstanceId,
        url: String,
    },
    Destroy {
        extension_id: ExtensionId,
        instance: ContextInstanceId,
    },
    CloseView {
        extension_id: ExtensionId,
        view_id: ViewId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    calls: Arc<Mutex<Vec<HostCall>>>,
}

impl RecordingHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.calls).clone()
    }

    #[must_use]
    pub fn created(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, HostCall::Create { .. }))
            .count()
    }

    #[must_use]
    pub fn destroyed(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, HostCall::Destroy { .. }))
            .count()
    }

    #[must_use]
    pub fn closed_views(&self) -> Vec<ViewId> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                HostCall::CloseView { view_id, .. } => Some(*view_id),
                _ => None,
            })
            .collect()
    }
}

impl ContextHost for RecordingHost {
    fn create_context(&mut self, extension: &ExtensionId, instance: ContextInstanceId, url: &str) {
        lock(&self.calls).push(HostCall::Create {
            extension_id: extension.clone(),
            instance,
            url: url.to_string(),
        });
    }

    fn destroy_context(&mut self, extension: &ExtensionId, instance: ContextInstanceId) {
        lock(&self.calls).push(HostCall::Destroy {
            extension_id: extension.clone(),
            instance,
        });
    }

    fn close_view(&mut self, extension: &ExtensionId, view: ViewId) {
        lock(&self.calls).push(HostCall::CloseView {
            extension_id: extension.clone(),
            view_id: view,
        });
    }
}

// =============================================================================
// Worker runtime
// =============================================================================

#[derive(Debug)]
struct WorkerState {
    start_result: ExternalRequestResult,
    finish_result: ExternalRequestResult,
    started: Vec<(i64, TimeoutPolicy, RequestToken)>,
    finished: Vec<(i64, RequestToken)>,
}

/// Worker runtime answering every call with a configurable result.
#[derive(Debug, Clone)]
pub struct StaticWorkerRuntime {
    state: Arc<Mutex<WorkerState>>,
}

impl Default for StaticWorkerRuntime {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(WorkerState {
                start_result: ExternalRequestResult::Ok,
                finish_result: ExternalRequestResult::Ok,
                started: Vec::new(),
                finished: Vec::new(),
            })),
        }
    }
}

impl StaticWorkerRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_start_result(&self, result: ExternalRequestResult) {
        lock(&self.state).start_result = result;
    }

    pub fn set_finish_result(&self, result: ExternalRequestResult) {
        lock(&self.state).finish_result = result;
    }

    #[must_use]
    pub fn started(&self) -> Vec<(i64, TimeoutPolicy, RequestToken)> {
        lock(&self.state).started.clone()
    }

    #[must_use]
    pub fn finished(&self) -> Vec<(i64, RequestToken)> {
        lock(&self.state).finished.clone()
    }
}

impl WorkerRuntime for StaticWorkerRuntime {
    fn starting_external_request(
        &mut self,
        version_id: i64,
        timeout: TimeoutPolicy,
        token: RequestToken,
    ) -> ExternalRequestResult {
        let mut state = lock(&self.state);
        state.started.push((version_id, timeout, token));
        state.start_result
    }

    fn finished_external_request(
        &mut self,
        version_id: i64,
        token: RequestToken,
    ) -> ExternalRequestResult {
        let mut state = lock(&self.state);
        state.finished.push((version_id, token));
        state.finish_result
    }
}

// =============================================================================
// Observer
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        lock(&self.events).clone()
    }

    pub fn take_events(&self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut *lock(&self.events))
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(LifecycleEvent::name).collect()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn on_event(&mut self, event: &LifecycleEvent) {
        lock(&self.events).push(event.clone());
    }
}

// =============================================================================
// Test rig
// =============================================================================

/// A manager wired to recording fakes and a manual clock.
pub struct TestRig {
    pub manager: LifecycleManager,
    pub scheduler: ManualScheduler,
    pub remote: RecordingRemote,
    pub host: RecordingHost,
    pub workers: StaticWorkerRuntime,
    pub observer: RecordingObserver,
}

impl TestRig {
    #[must_use]
    pub fn new(config: LifecycleConfig) -> Self {
        let scheduler = ManualScheduler::new();
        let remote = RecordingRemote::new();
        let host = RecordingHost::new();
        let workers = StaticWorkerRuntime::new();
        let observer = RecordingObserver::new();

        let mut manager = LifecycleManager::new(
            config,
            Collaborators {
                host: Box::new(host.clone()),
                remote: Box::new(remote.clone()),
                workers: Box::new(workers.clone()),
                scheduler: Box::new(scheduler.clone()),
            },
        );
        manager.add_observer(Box::new(observer.clone()));

        Self {
            manager,
            scheduler,
            remote,
            host,
            workers,
            observer,
        }
    }

    /// Advance the virtual clock by `by`, running every task that falls due.
    pub fn advance(&mut self, by: Duration) -> usize {
        self.manager.run_due_tasks(&self.scheduler, by)
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        use crate::scheduler::TaskScheduler;
        self.scheduler.now()
    }

    /// Sequence id carried by the most recent `ShouldSuspend`.
    #[must_use]
    pub fn last_should_suspend_seq(&self) -> Option<u64> {
        self.remote
            .messages()
            .iter()
            .rev()
            .find_map(|message| match message {
                RemoteMessage::ShouldSuspend { sequence_id, .. } => Some(*sequence_id),
                _ => None,
            })
    }

    /// Sequence id carried by the most recent `Suspend`.
    #[must_use]
    pub fn last_suspend_seq(&self) -> Option<u64> {
        self.remote
            .messages()
            .iter()
            .rev()
            .find_map(|message| match message {
                RemoteMessage::Suspend { sequence_id, .. } => Some(*sequence_id),
                _ => None,
            })
    }

    /// Acknowledge the latest `ShouldSuspend` and then the resulting
    /// `Suspend`, the way a cooperative remote context would.
    pub fn ack_full_handshake(&mut self, extension: &ExtensionId) -> bool {
        let Some(seq) = self.last_should_suspend_seq() else {
            return false;
        };
        self.manager.on_should_suspend_ack(extension, seq);
        if self.last_suspend_seq() != Some(seq) {
            return false;
        }
        self.manager.on_suspend_ack(extension, seq);
        true
    }
}
