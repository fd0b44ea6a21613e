//! Lifecycle event fan-out.

use serde::Serialize;
use uuid::Uuid;

use crate::suspend::RemoteMessage;
use crate::types::{ContextInstanceId, ExtensionId, ProcessId, ViewId, ViewKind, WorkerId};

/// Why a background context was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyReason {
    /// The suspend handshake completed.
    Suspended,
    /// The extension was unloaded.
    Unloaded,
    /// The manager shut down.
    Shutdown,
    /// The host reported the context gone (crash or self-close).
    Gone,
}

impl DestroyReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Unloaded => "unloaded",
            Self::Shutdown => "shutdown",
            Self::Gone => "gone",
        }
    }
}

impl std::fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something observers may care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ContextCreated {
        extension_id: ExtensionId,
        instance: ContextInstanceId,
    },
    ContextDestroyed {
        extension_id: ExtensionId,
        instance: ContextInstanceId,
        reason: DestroyReason,
    },
    ViewRegistered {
        extension_id: ExtensionId,
        view_id: ViewId,
        kind: ViewKind,
    },
    ViewUnregistered {
        extension_id: ExtensionId,
        view_id: ViewId,
    },
    /// The process hosting an extension's content went away.
    ProcessTerminated { extension_id: ExtensionId },
    ServiceWorkerRegistered {
        worker: WorkerId,
        context_id: Uuid,
    },
    ServiceWorkerUnregistered { worker: WorkerId },
    RenderProcessExited { render_process_id: ProcessId },
    /// A handshake directive went out.
    MessageSent { message: RemoteMessage },
    SuspendCanceled { extension_id: ExtensionId },
    /// Claims were outstanding right after teardown.
    LateActivity {
        extension_id: ExtensionId,
        keepalive_count: usize,
    },
    Shutdown,
}

impl LifecycleEvent {
    /// Short name matching the serialized tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ContextCreated { .. } => "context_created",
            Self::ContextDestroyed { .. } => "context_destroyed",
            Self::ViewRegistered { .. } => "view_registered",
            Self::ViewUnregistered { .. } => "view_unregistered",
            Self::ProcessTerminated { .. } => "process_terminated",
            Self::ServiceWorkerRegistered { .. } => "service_worker_registered",
            Self::ServiceWorkerUnregistered { .. } => "service_worker_unregistered",
            Self::RenderProcessExited { .. } => "render_process_exited",
            Self::MessageSent { .. } => "message_sent",
            Self::SuspendCanceled { .. } => "suspend_canceled",
            Self::LateActivity { .. } => "late_activity",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Receives lifecycle events. Must not call back into the manager.
pub trait LifecycleObserver: Send {
    fn on_event(&mut self, event: &LifecycleEvent);
}

/// Handle returned by [`ObserverList::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct ObserverList {
    next_id: u64,
    observers: Vec<(ObserverId, Box<dyn LifecycleObserver>)>,
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.observers.len())
            .finish()
    }
}

impl ObserverList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Box<dyn LifecycleObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> Option<Box<dyn LifecycleObserver>> {
        let index = self.observers.iter().position(|(oid, _)| *oid == id)?;
        Some(self.observers.remove(index).1)
    }

    pub fn notify(&mut self, event: &LifecycleEvent) {
        for (_, observer) in &mut self.observers {
            observer.on_event(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}
