//! The lifecycle manager.
//!
//! [`LifecycleManager`] owns the keepalive ledger, the sequence guard, the
//! view registry and the service-worker tracker, and drives background
//! contexts through creation, the suspend handshake and teardown. It is a
//! synchronous `&mut self` state machine: timers and remote acknowledgements
//! re-enter through [`LifecycleManager::run_task`] and the `on_*_ack`
//! methods, and every re-entry is checked against the current close
//! sequence id before it has any effect.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::config::{LateActivityPolicy, LifecycleConfig};
use crate::error::LifecycleError;
use crate::host::{ContextHost, RemoteRuntime, WorkerRuntime};
use crate::ledger::{ActivityMultiset, BackgroundContextRecord, KeepaliveLedger, LedgerTransition};
use crate::observer::{DestroyReason, LifecycleEvent, LifecycleObserver, ObserverId, ObserverList};
use crate::scheduler::{ManualScheduler, ScheduledTask, TaskScheduler};
use crate::sequence::SequenceGuard;
use crate::service_worker::{ServiceWorkerKeepaliveRecord, WorkerTracker};
use crate::suspend::{self, RemoteMessage, StaleReason, SuspendPhase};
use crate::telemetry::{LifecycleMetrics, MetricsSnapshot};
use crate::types::{
    Activity, ActivityType, BackgroundKind, ContextInstanceId, DETAIL_CANCEL_SUSPEND,
    DETAIL_RENDER_FRAME, ExtensionId, ExtensionInfo, ExternalRequestResult, ProcessId,
    RequestToken, TimeoutPolicy, ViewId, ViewKind, WorkerId,
};
use crate::views::ViewRegistry;

type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// Outbound collaborators injected into the manager.
pub struct Collaborators {
    pub host: Box<dyn ContextHost>,
    pub remote: Box<dyn RemoteRuntime>,
    pub workers: Box<dyn WorkerRuntime>,
    pub scheduler: Box<dyn TaskScheduler>,
}

/// A live background context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveContext {
    pub instance: ContextInstanceId,
    pub url: String,
    /// Scheduler time at creation.
    pub created_at: Duration,
}

pub struct LifecycleManager {
    config: LifecycleConfig,
    host: Box<dyn ContextHost>,
    remote: Box<dyn RemoteRuntime>,
    worker_runtime: Box<dyn WorkerRuntime>,
    scheduler: Box<dyn TaskScheduler>,
    observers: ObserverList,

    extensions: HashMap<ExtensionId, ExtensionInfo>,
    contexts: HashMap<ExtensionId, LiveContext>,
    ledger: KeepaliveLedger,
    sequence: SequenceGuard,
    views: ViewRegistry,
    workers: WorkerTracker,
    /// In-flight network requests, keyed by request id, with the context
    /// instance that issued them.
    network: HashMap<u64, (ExtensionId, ContextInstanceId)>,
    metrics: LifecycleMetrics,

    system_ready: bool,
    startup_contexts_created: bool,
    shut_down: bool,
    next_instance: u64,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("extensions", &self.extensions.len())
            .field("contexts", &self.contexts.len())
            .field("views", &self.views.len())
            .field("workers", &self.workers.worker_count())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl LifecycleManager {
    #[must_use]
    pub fn new(config: LifecycleConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            host: collaborators.host,
            remote: collaborators.remote,
            worker_runtime: collaborators.workers,
            scheduler: collaborators.scheduler,
            observers: ObserverList::new(),
            extensions: HashMap::new(),
            contexts: HashMap::new(),
            ledger: KeepaliveLedger::new(),
            sequence: SequenceGuard::new(),
            views: ViewRegistry::new(),
            workers: WorkerTracker::new(),
            network: HashMap::new(),
            metrics: LifecycleMetrics::default(),
            system_ready: false,
            startup_contexts_created: false,
            shut_down: false,
            next_instance: 1,
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn extension(&self, extension: &ExtensionId) -> Option<&ExtensionInfo> {
        self.extensions.get(extension)
    }

    #[must_use]
    pub fn context(&self, extension: &ExtensionId) -> Option<&LiveContext> {
        self.contexts.get(extension)
    }

    #[must_use]
    pub fn has_context(&self, extension: &ExtensionId) -> bool {
        self.contexts.contains_key(extension)
    }

    /// Extensions with a live context, sorted.
    #[must_use]
    pub fn live_extensions(&self) -> Vec<ExtensionId> {
        let mut ids: Vec<_> = self.contexts.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn background_record(&self, extension: &ExtensionId) -> Option<&BackgroundContextRecord> {
        self.ledger.record(extension)
    }

    /// Outstanding lazy claims, or `None` when the extension has no event
    /// page.
    #[must_use]
    pub fn lazy_keepalive_count(&self, extension: &ExtensionId) -> Option<usize> {
        self.lazy_info(extension)
            .map(|_| self.ledger.count(extension))
    }

    /// Outstanding lazy claims by activity; empty for non-lazy extensions.
    #[must_use]
    pub fn lazy_keepalive_activities(&self, extension: &ExtensionId) -> ActivityMultiset {
        if self.lazy_info(extension).is_some() {
            self.ledger.activities(extension)
        } else {
            ActivityMultiset::new()
        }
    }

    /// True when the extension has no live context.
    #[must_use]
    pub fn is_context_suspended(&self, extension: &ExtensionId) -> bool {
        !self.contexts.contains_key(extension)
    }

    #[must_use]
    pub fn is_context_closing(&self, extension: &ExtensionId) -> bool {
        self.ledger
            .record(extension)
            .is_some_and(|record| record.is_closing)
    }

    #[must_use]
    pub fn suspend_phase(&self, extension: &ExtensionId) -> Option<SuspendPhase> {
        self.ledger.record(extension).map(|record| record.phase)
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn add_observer(&mut self, observer: Box<dyn LifecycleObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id).is_some()
    }

    fn lazy_info(&self, extension: &ExtensionId) -> Option<&ExtensionInfo> {
        self.extensions
            .get(extension)
            .filter(|info| info.background.is_lazy())
    }

    fn known(&self, extension: &ExtensionId) -> LifecycleResult<&ExtensionInfo> {
        self.extensions
            .get(extension)
            .ok_or_else(|| LifecycleError::UnknownExtension(extension.clone()))
    }

    fn ensure_running(&self) -> LifecycleResult<()> {
        if self.shut_down {
            Err(LifecycleError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn notify(&mut self, event: LifecycleEvent) {
        self.observers.notify(&event);
    }

    // =========================================================================
    // Extension registry
    // =========================================================================

    /// Record a loaded extension. Persistent contexts are created right away
    /// once startup contexts exist.
    pub fn on_extension_loaded(&mut self, info: ExtensionInfo) -> LifecycleResult<()> {
        self.ensure_running()?;
        let id = info.id.clone();
        let kind = info.background;
        tracing::debug!(extension_id = %id, background = %kind, "extension loaded");
        self.extensions.insert(id.clone(), info);
        if kind.is_lazy() {
            self.ledger.ensure(&id);
        }
        if kind == BackgroundKind::Persistent && self.startup_contexts_created {
            self.create_startup_context(&id);
        }
        Ok(())
    }

    /// Forget an extension. Its context is destroyed without a handshake and
    /// every record it owns is dropped; acknowledgements still in flight
    /// become no-ops.
    pub fn on_extension_unloaded(&mut self, extension: &ExtensionId) {
        if self.extensions.remove(extension).is_none() {
            tracing::trace!(extension_id = %extension, "unload of unknown extension ignored");
            return;
        }
        tracing::debug!(extension_id = %extension, "extension unloaded");

        if self.contexts.contains_key(extension) {
            self.destroy_context(extension, DestroyReason::Unloaded, true);
        }

        for (view, _) in self.views.remove_extension(extension) {
            self.notify(LifecycleEvent::ViewUnregistered {
                extension_id: extension.clone(),
                view_id: view,
            });
        }
        self.ledger.remove(extension);
        self.network.retain(|_, (owner, _)| owner != extension);

        for worker in self.workers.workers_for_extension(extension) {
            self.workers.unregister(&worker);
            self.notify(LifecycleEvent::ServiceWorkerUnregistered { worker });
        }
        let dropped = self.workers.drop_keepalives_for_extension(extension);
        if !dropped.is_empty() {
            tracing::debug!(
                extension_id = %extension,
                dropped = dropped.len(),
                "dropped service worker keepalives of unloaded extension"
            );
        }
    }

    /// The embedder finished startup. Creates persistent contexts unless
    /// configured to defer them.
    pub fn on_system_ready(&mut self) {
        if self.shut_down || self.system_ready {
            return;
        }
        self.system_ready = true;
        if self.config.defer_startup_contexts {
            tracing::debug!("startup contexts deferred");
            return;
        }
        self.startup_contexts_created = true;

        let mut persistent: Vec<ExtensionId> = self
            .extensions
            .values()
            .filter(|info| info.background == BackgroundKind::Persistent)
            .map(|info| info.id.clone())
            .collect();
        persistent.sort();
        for id in persistent {
            self.create_startup_context(&id);
        }
    }

    fn create_startup_context(&mut self, extension: &ExtensionId) {
        if let Err(err) = self.create_background_context(extension) {
            tracing::debug!(extension_id = %extension, error = %err, "startup context not created");
        }
    }

    // =========================================================================
    // Contexts
    // =========================================================================

    /// Create the background context for a page-based extension, or return
    /// the live one.
    pub fn create_background_context(
        &mut self,
        extension: &ExtensionId,
    ) -> LifecycleResult<ContextInstanceId> {
        self.ensure_running()?;
        let info = self.known(extension)?;
        if !info.background.has_page() {
            return Err(LifecycleError::NoBackgroundPage {
                extension: extension.clone(),
                kind: info.background,
            });
        }
        if !self.config.background_contexts_allowed {
            return Err(LifecycleError::ContextNotAllowed(extension.clone()));
        }
        if let Some(live) = self.contexts.get(extension) {
            return Ok(live.instance);
        }
        let info = info.clone();
        Ok(self.spawn_context(&info))
    }

    /// Bring a suspended event page back. Returns whether a context was
    /// created.
    pub fn wake_context(&mut self, extension: &ExtensionId) -> LifecycleResult<bool> {
        self.ensure_running()?;
        let kind = self.known(extension)?.background;
        if !kind.is_lazy() {
            return Err(LifecycleError::WrongBackgroundKind {
                extension: extension.clone(),
                kind,
                expected: BackgroundKind::EventPage,
            });
        }
        if self.contexts.contains_key(extension) {
            return Ok(false);
        }
        self.create_background_context(extension)?;
        Ok(true)
    }

    /// Start the suspend handshake now instead of after the idle delay.
    ///
    /// Returns `Ok(false)` when the context is absent, busy or already
    /// closing.
    pub fn request_suspend(&mut self, extension: &ExtensionId) -> LifecycleResult<bool> {
        self.ensure_running()?;
        let kind = self.known(extension)?.background;
        if !kind.is_lazy() {
            return Err(LifecycleError::NotSuspendable {
                extension: extension.clone(),
                kind,
            });
        }
        if !self.contexts.contains_key(extension) {
            return Ok(false);
        }
        let record = self.ledger.ensure(extension);
        if record.keepalive_count > 0 || record.is_closing || record.phase.is_in_flight() {
            return Ok(false);
        }
        let sequence_id = self.sequence.issue(record);
        tracing::debug!(extension_id = %extension, sequence_id, "suspend requested");
        self.scheduler.post_delayed(
            Duration::ZERO,
            ScheduledTask::IdleCheck {
                extension_id: extension.clone(),
                sequence_id,
            },
        );
        Ok(true)
    }

    /// The host reports that a context went away on its own (crash or
    /// self-close).
    pub fn on_background_context_gone(&mut self, extension: &ExtensionId) {
        if !self.contexts.contains_key(extension) {
            tracing::trace!(extension_id = %extension, "gone report for absent context ignored");
            return;
        }
        self.destroy_context(extension, DestroyReason::Gone, false);
    }

    fn spawn_context(&mut self, info: &ExtensionInfo) -> ContextInstanceId {
        let instance = ContextInstanceId(self.next_instance);
        self.next_instance += 1;
        let now = self.scheduler.now();

        self.host.create_context(&info.id, instance, &info.url);
        self.contexts.insert(
            info.id.clone(),
            LiveContext {
                instance,
                url: info.url.clone(),
                created_at: now,
            },
        );
        self.metrics.contexts_created += 1;
        tracing::info!(
            extension_id = %info.id,
            instance = %instance,
            background = %info.background,
            "background context created"
        );

        if info.background.is_lazy() {
            let record = self.ledger.ensure(&info.id);
            suspend::reset(record);
            if let Some(since) = record.since_suspended.take() {
                let idle_ms = now.saturating_sub(since).as_secs_f64() * 1000.0;
                self.metrics.idle_time.record(idle_ms);
            }
            let sequence_id = self.sequence.issue(record);
            if record.keepalive_count == 0 {
                self.post_idle_check(&info.id, sequence_id);
            }
        }

        self.notify(LifecycleEvent::ContextCreated {
            extension_id: info.id.clone(),
            instance,
        });
        instance
    }

    fn destroy_context(&mut self, extension: &ExtensionId, reason: DestroyReason, call_host: bool) {
        let Some(live) = self.contexts.remove(extension) else {
            return;
        };
        if call_host {
            self.host.destroy_context(extension, live.instance);
        }

        // Requests issued by this instance will never report completion.
        let orphaned: Vec<u64> = self
            .network
            .iter()
            .filter(|(_, (_, instance))| *instance == live.instance)
            .map(|(id, _)| *id)
            .collect();
        for request_id in orphaned {
            self.network.remove(&request_id);
            let activity = Activity::new(ActivityType::Network, request_id.to_string());
            if let Err(err) = self.ledger.decrement(extension, &activity) {
                tracing::trace!(extension_id = %extension, error = %err, "orphaned request had no claim");
            }
        }

        let now = self.scheduler.now();
        if let Some(record) = self.ledger.record_mut(extension) {
            suspend::mark_closed(record);
            record.since_suspended = Some(now);
        }
        self.metrics.contexts_destroyed += 1;
        tracing::info!(
            extension_id = %extension,
            instance = %live.instance,
            reason = %reason,
            "background context destroyed"
        );
        self.notify(LifecycleEvent::ContextDestroyed {
            extension_id: extension.clone(),
            instance: live.instance,
            reason,
        });

        if matches!(reason, DestroyReason::Suspended | DestroyReason::Gone) {
            self.check_late_activity(extension);
        }
    }

    fn check_late_activity(&mut self, extension: &ExtensionId) {
        let count = self.ledger.count(extension);
        if count == 0 || self.shut_down {
            return;
        }
        match self.config.late_activity {
            LateActivityPolicy::Recreate => {
                tracing::info!(
                    extension_id = %extension,
                    keepalive_count = count,
                    "claims outstanding after teardown; recreating context"
                );
                if let Some(info) = self.extensions.get(extension).cloned() {
                    self.spawn_context(&info);
                }
            }
            LateActivityPolicy::Report => {
                tracing::warn!(
                    extension_id = %extension,
                    keepalive_count = count,
                    "claims outstanding after teardown"
                );
                self.metrics.late_activity += 1;
                self.notify(LifecycleEvent::LateActivity {
                    extension_id: extension.clone(),
                    keepalive_count: count,
                });
            }
        }
    }

    // =========================================================================
    // Lazy keepalive
    // =========================================================================

    /// Take a claim on an event page. No-op for other background kinds.
    pub fn increment_lazy_keepalive(
        &mut self,
        extension: &ExtensionId,
        activity_type: ActivityType,
        detail: &str,
    ) -> LifecycleResult<()> {
        self.ensure_running()?;
        if !self.known(extension)?.background.is_lazy() {
            return Ok(());
        }
        self.increment_claim(extension, Activity::new(activity_type, detail));
        Ok(())
    }

    /// Release a claim. Releases for unloaded extensions are ignored.
    pub fn decrement_lazy_keepalive(
        &mut self,
        extension: &ExtensionId,
        activity_type: ActivityType,
        detail: &str,
    ) -> LifecycleResult<()> {
        let Some(info) = self.extensions.get(extension) else {
            tracing::trace!(extension_id = %extension, "release for unloaded extension ignored");
            return Ok(());
        };
        if !info.background.is_lazy() {
            return Ok(());
        }
        self.decrement_claim(extension, &Activity::new(activity_type, detail))
    }

    fn increment_claim(&mut self, extension: &ExtensionId, activity: Activity) {
        tracing::trace!(extension_id = %extension, activity = %activity, "keepalive acquired");
        if self.ledger.increment(extension, activity) == LedgerTransition::BecameActive {
            self.on_became_active(extension);
        }
    }

    fn decrement_claim(&mut self, extension: &ExtensionId, activity: &Activity) -> LifecycleResult<()> {
        tracing::trace!(extension_id = %extension, activity = %activity, "keepalive released");
        if self.ledger.decrement(extension, activity)? == LedgerTransition::BecameIdle {
            let closing = self.is_context_closing(extension);
            if !closing {
                let record = self.ledger.ensure(extension);
                let sequence_id = self.sequence.issue(record);
                self.post_idle_check(extension, sequence_id);
            }
        }
        Ok(())
    }

    fn on_became_active(&mut self, extension: &ExtensionId) {
        let in_flight = self
            .ledger
            .record(extension)
            .is_some_and(|record| record.phase.is_in_flight());
        if in_flight {
            self.cancel_suspend_inner(extension);
        }
        if let Some(record) = self.ledger.record_mut(extension) {
            self.sequence.on_became_active(record);
        }
    }

    fn post_idle_check(&mut self, extension: &ExtensionId, sequence_id: u64) {
        tracing::trace!(extension_id = %extension, sequence_id, "idle period started");
        self.scheduler.post_delayed(
            self.config.idle_delay(),
            ScheduledTask::IdleCheck {
                extension_id: extension.clone(),
                sequence_id,
            },
        );
    }

    // =========================================================================
    // Suspend handshake
    // =========================================================================

    /// Execute a task posted earlier through the scheduler.
    pub fn run_task(&mut self, task: ScheduledTask) {
        match task {
            ScheduledTask::IdleCheck {
                extension_id,
                sequence_id,
            } => self.on_idle(&extension_id, sequence_id),
            ScheduledTask::SuspendGrace {
                extension_id,
                sequence_id,
            } => {
                if let Err(reason) = self.close_now(&extension_id, sequence_id) {
                    self.metrics.stale_timers_dropped += 1;
                    tracing::trace!(
                        extension_id = %extension_id,
                        sequence_id,
                        reason = %reason,
                        "grace timer dropped"
                    );
                }
            }
        }
    }

    /// Run every task due within `advance` of the shared manual clock.
    pub fn run_due_tasks(&mut self, scheduler: &ManualScheduler, advance: Duration) -> usize {
        let deadline = scheduler.now() + advance;
        let mut ran = 0;
        while let Some(task) = scheduler.pop_due(deadline) {
            self.run_task(task);
            ran += 1;
        }
        scheduler.set_now(deadline);
        ran
    }

    fn on_idle(&mut self, extension: &ExtensionId, sequence_id: u64) {
        let _span =
            crate::lifecycle_span!("idle_check", extension_id = %extension, sequence_id).entered();
        let has_context = self.contexts.contains_key(extension);
        let verdict = match self.ledger.record(extension) {
            Some(record) => suspend::check_idle(record, sequence_id, has_context),
            None => Err(StaleReason::NoContext),
        };
        if let Err(reason) = verdict {
            self.metrics.stale_timers_dropped += 1;
            tracing::trace!(reason = %reason, "idle check dropped");
            return;
        }

        let message = RemoteMessage::ShouldSuspend {
            extension_id: extension.clone(),
            sequence_id,
        };
        if self.send(message) {
            if let Some(record) = self.ledger.record_mut(extension) {
                suspend::mark_should_suspend_sent(record);
            }
            self.metrics.should_suspend_sent += 1;
        }
    }

    /// The context answered `ShouldSuspend` for idle period `sequence_id`.
    pub fn on_should_suspend_ack(&mut self, extension: &ExtensionId, sequence_id: u64) {
        let _span = crate::lifecycle_span!("should_suspend_ack", extension_id = %extension, sequence_id)
            .entered();
        let verdict = if self.contexts.contains_key(extension) {
            self.ledger.record(extension).map_or(Err(StaleReason::NoContext), |record| {
                suspend::check_should_suspend_ack(record, sequence_id)
            })
        } else {
            Err(StaleReason::NoContext)
        };
        if let Err(reason) = verdict {
            self.metrics.stale_acks_dropped += 1;
            tracing::trace!(reason = %reason, "should_suspend ack dropped");
            return;
        }

        let message = RemoteMessage::Suspend {
            extension_id: extension.clone(),
            sequence_id,
        };
        if self.send(message) {
            if let Some(record) = self.ledger.record_mut(extension) {
                suspend::mark_suspend_sent(record);
            }
            self.metrics.suspend_sent += 1;
            self.scheduler.post_delayed(
                self.config.suspending_time(),
                ScheduledTask::SuspendGrace {
                    extension_id: extension.clone(),
                    sequence_id,
                },
            );
        } else if let Some(record) = self.ledger.record_mut(extension) {
            suspend::reset(record);
        }
    }

    /// The context acknowledged `Suspend`; tear it down now.
    pub fn on_suspend_ack(&mut self, extension: &ExtensionId, sequence_id: u64) {
        if let Err(reason) = self.close_now(extension, sequence_id) {
            self.metrics.stale_acks_dropped += 1;
            tracing::trace!(
                extension_id = %extension,
                sequence_id,
                reason = %reason,
                "suspend ack dropped"
            );
        }
    }

    /// Cancel an in-flight handshake. Returns whether one was in flight.
    pub fn cancel_suspend(&mut self, extension: &ExtensionId) -> LifecycleResult<bool> {
        let kind = self.known(extension)?.background;
        if !kind.is_lazy() {
            return Err(LifecycleError::NotSuspendable {
                extension: extension.clone(),
                kind,
            });
        }
        Ok(self.cancel_suspend_inner(extension))
    }

    fn close_now(&mut self, extension: &ExtensionId, sequence_id: u64) -> Result<(), StaleReason> {
        let _span =
            crate::lifecycle_span!("close_now", extension_id = %extension, sequence_id).entered();
        if !self.contexts.contains_key(extension) {
            return Err(StaleReason::NoContext);
        }
        let record = self.ledger.record(extension).ok_or(StaleReason::NoContext)?;
        suspend::check_close(record, sequence_id)?;

        if record.keepalive_count > 0 {
            tracing::debug!(
                keepalive_count = record.keepalive_count,
                "activity arrived after suspend; canceling"
            );
            self.cancel_suspend_inner(extension);
            return Ok(());
        }

        for view in self.views.closable_for_extension(extension) {
            self.host.close_view(extension, view);
            // Unregister now so a late unregistration from the host cannot
            // race a recreated context.
            if let Err(err) = self.unregister_view(view) {
                tracing::warn!(view_id = %view, error = %err, "closing view released a missing claim");
            }
        }
        tracing::debug!("suspend handshake complete");
        self.destroy_context(extension, DestroyReason::Suspended, true);
        Ok(())
    }

    fn cancel_suspend_inner(&mut self, extension: &ExtensionId) -> bool {
        if !self.contexts.contains_key(extension) {
            return false;
        }
        let Some(record) = self.ledger.record_mut(extension) else {
            return false;
        };
        if !record.phase.is_in_flight() {
            return false;
        }
        let suspend_was_sent = suspend::reset(record);
        if suspend_was_sent {
            self.send(RemoteMessage::CancelSuspend {
                extension_id: extension.clone(),
            });
            self.metrics.cancel_suspend_sent += 1;
        }
        self.metrics.suspends_canceled += 1;
        tracing::debug!(extension_id = %extension, suspend_was_sent, "suspend canceled");
        self.notify(LifecycleEvent::SuspendCanceled {
            extension_id: extension.clone(),
        });

        // An instantaneous claim invalidates the current sequence id and,
        // if nothing else holds the context, starts a fresh idle period.
        let activity = Activity::new(ActivityType::ProcessManager, DETAIL_CANCEL_SUSPEND);
        self.increment_claim(extension, activity.clone());
        if let Err(err) = self.decrement_claim(extension, &activity) {
            tracing::warn!(extension_id = %extension, error = %err, "cancel claim release failed");
        }
        if let Some(record) = self.ledger.record_mut(extension) {
            if record.keepalive_count > 0 {
                let _ = self.sequence.issue(record);
            }
        }
        true
    }

    fn send(&mut self, message: RemoteMessage) -> bool {
        tracing::debug!(
            extension_id = %message.extension_id(),
            message = message.kind(),
            "sending handshake message"
        );
        match self.remote.send(message.clone()) {
            Ok(()) => {
                self.notify(LifecycleEvent::MessageSent { message });
                true
            }
            Err(err) => {
                self.metrics.remote_unavailable += 1;
                tracing::debug!(
                    extension_id = %message.extension_id(),
                    message = message.kind(),
                    error = %err,
                    "handshake message not delivered"
                );
                false
            }
        }
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Register a view, taking a claim if its kind can hold one.
    pub fn register_view(
        &mut self,
        extension: &ExtensionId,
        view: ViewId,
        kind: ViewKind,
    ) -> LifecycleResult<()> {
        self.ensure_running()?;
        self.known(extension)?;
        let registration = self.views.register(extension, view, kind)?;
        if registration.must_release {
            self.release_view_keepalive(view)?;
        }
        self.acquire_view_keepalive(view)?;
        tracing::debug!(
            extension_id = %extension,
            view_id = %view,
            kind = %kind,
            is_new = registration.is_new,
            "view registered"
        );
        self.notify(LifecycleEvent::ViewRegistered {
            extension_id: extension.clone(),
            view_id: view,
            kind,
        });
        Ok(())
    }

    /// Unregister a view and release its claim. Unknown views are ignored.
    pub fn unregister_view(&mut self, view: ViewId) -> LifecycleResult<()> {
        if !self.views.contains(view) {
            tracing::trace!(view_id = %view, "unregister of unknown view ignored");
            return Ok(());
        }
        let released = self.release_view_keepalive(view);
        if let Some(record) = self.views.remove(view) {
            tracing::debug!(extension_id = %record.extension_id, view_id = %view, "view unregistered");
            self.notify(LifecycleEvent::ViewUnregistered {
                extension_id: record.extension_id,
                view_id: view,
            });
        }
        released
    }

    pub fn acquire_view_keepalive(&mut self, view: ViewId) -> LifecycleResult<()> {
        let Some(extension) = self.views.acquire(view) else {
            return Ok(());
        };
        if self.lazy_info(&extension).is_some() {
            self.increment_claim(&extension, Activity::new(ActivityType::ProcessManager, DETAIL_RENDER_FRAME));
        }
        Ok(())
    }

    pub fn release_view_keepalive(&mut self, view: ViewId) -> LifecycleResult<()> {
        let Some(extension) = self.views.release(view) else {
            return Ok(());
        };
        self.decrement_lazy_keepalive(&extension, ActivityType::ProcessManager, DETAIL_RENDER_FRAME)
    }

    #[must_use]
    pub fn views_for_extension(&self, extension: &ExtensionId) -> Vec<(ViewId, ViewKind)> {
        self.views.for_extension(extension)
    }

    #[must_use]
    pub fn is_view_registered(&self, view: ViewId) -> bool {
        self.views.contains(view)
    }

    #[must_use]
    pub fn view_has_keepalive(&self, view: ViewId) -> bool {
        self.views.get(view).is_some_and(|record| record.has_keepalive)
    }

    // =========================================================================
    // Network requests
    // =========================================================================

    /// A request started from `view`. Only requests from an extension's own
    /// background document hold claims.
    pub fn network_request_started(&mut self, view: ViewId, request_id: u64) -> LifecycleResult<()> {
        let Some(record) = self.views.get(view) else {
            return Ok(());
        };
        if record.kind != ViewKind::ExtensionBackgroundPage {
            return Ok(());
        }
        let extension = record.extension_id.clone();
        let Some(live) = self.contexts.get(&extension) else {
            return Ok(());
        };
        if self.network.contains_key(&request_id) {
            return Err(LifecycleError::DuplicateNetworkRequest(request_id));
        }
        self.network.insert(request_id, (extension.clone(), live.instance));
        self.increment_lazy_keepalive(&extension, ActivityType::Network, &request_id.to_string())
    }

    /// A request finished. Requests whose context instance is gone are
    /// ignored.
    pub fn network_request_done(&mut self, view: ViewId, request_id: u64) -> LifecycleResult<()> {
        let Some((extension, instance)) = self.network.remove(&request_id) else {
            return Ok(());
        };
        let current = self.contexts.get(&extension).map(|live| live.instance);
        if current != Some(instance) {
            tracing::trace!(
                extension_id = %extension,
                view_id = %view,
                request_id,
                "request finished after its context was replaced"
            );
            return Ok(());
        }
        self.decrement_lazy_keepalive(&extension, ActivityType::Network, &request_id.to_string())
    }

    #[must_use]
    pub fn pending_network_requests(&self) -> usize {
        self.network.len()
    }

    // =========================================================================
    // Devtools
    // =========================================================================

    /// Devtools attached to an event page: abort any suspend and hold the
    /// context while attached.
    pub fn devtools_attached(&mut self, extension: &ExtensionId) -> LifecycleResult<()> {
        self.ensure_running()?;
        if !self.known(extension)?.background.is_lazy() {
            return Ok(());
        }
        self.cancel_suspend_inner(extension);
        self.increment_claim(extension, Activity::new(ActivityType::DevTools, ""));
        Ok(())
    }

    pub fn devtools_detached(&mut self, extension: &ExtensionId) -> LifecycleResult<()> {
        self.decrement_lazy_keepalive(extension, ActivityType::DevTools, "")
    }

    // =========================================================================
    // Service workers
    // =========================================================================

    /// Register a running worker and return its context id.
    pub fn register_service_worker(&mut self, worker: WorkerId) -> LifecycleResult<Uuid> {
        self.ensure_running()?;
        self.known(&worker.extension_id)?;
        let (context_id, is_new) = self.workers.register(worker.clone());
        if is_new {
            tracing::debug!(
                extension_id = %worker.extension_id,
                worker_version = worker.version_id,
                render_process_id = worker.render_process_id.0,
                "service worker registered"
            );
            self.notify(LifecycleEvent::ServiceWorkerRegistered { worker, context_id });
        }
        Ok(context_id)
    }

    /// Forget a worker. Its keepalives stay until released.
    pub fn unregister_service_worker(&mut self, worker: &WorkerId) {
        if self.workers.unregister(worker).is_some() {
            tracing::debug!(
                extension_id = %worker.extension_id,
                worker_version = worker.version_id,
                "service worker unregistered"
            );
            self.notify(LifecycleEvent::ServiceWorkerUnregistered {
                worker: worker.clone(),
            });
        }
    }

    #[must_use]
    pub fn has_service_worker(&self, worker: &WorkerId) -> bool {
        self.workers.has_worker(worker)
    }

    #[must_use]
    pub fn service_workers_for_extension(&self, extension: &ExtensionId) -> Vec<WorkerId> {
        self.workers.workers_for_extension(extension)
    }

    #[must_use]
    pub fn context_id_for_worker(&self, worker: &WorkerId) -> Option<Uuid> {
        self.workers.context_id(worker)
    }

    #[must_use]
    pub fn service_worker_keepalives_for_extension(
        &self,
        extension: &ExtensionId,
    ) -> Vec<ServiceWorkerKeepaliveRecord> {
        self.workers.keepalives_for_extension(extension)
    }

    /// A renderer process died. Its workers are unregistered and every
    /// keepalive held in it is dropped without telling the (gone) worker
    /// runtime, including those of workers unregistered earlier.
    pub fn on_render_process_exited(&mut self, process: ProcessId) {
        let dropped = self.workers.reap_process(process);
        for record in &dropped {
            tracing::debug!(
                extension_id = %record.worker.extension_id,
                worker_version = record.worker.version_id,
                render_process_id = process.0,
                request_token = %record.request_token,
                "dropped keepalive of exited process"
            );
        }
        for worker in self.workers.workers_in_process(process) {
            self.unregister_service_worker(&worker);
        }
        self.notify(LifecycleEvent::RenderProcessExited {
            render_process_id: process,
        });
    }

    pub fn notify_extension_process_terminated(&mut self, extension: &ExtensionId) {
        self.notify(LifecycleEvent::ProcessTerminated {
            extension_id: extension.clone(),
        });
    }

    /// Start an external request on the worker runtime and return the token
    /// that releases it.
    ///
    /// A failed start is recorded and classified but not retried; the
    /// release must still be issued.
    pub fn increment_service_worker_keepalive(
        &mut self,
        worker: &WorkerId,
        timeout_policy: TimeoutPolicy,
        activity_type: ActivityType,
        detail: &str,
    ) -> LifecycleResult<RequestToken> {
        self.ensure_running()?;
        let kind = self.known(&worker.extension_id)?.background;
        if kind != BackgroundKind::ServiceWorker {
            return Err(LifecycleError::WrongBackgroundKind {
                extension: worker.extension_id.clone(),
                kind,
                expected: BackgroundKind::ServiceWorker,
            });
        }
        if !self.workers.has_worker(worker) {
            return Err(LifecycleError::UnknownWorker(worker.clone()));
        }

        let request_token = RequestToken::generate();
        let start_result = self.worker_runtime.starting_external_request(
            worker.version_id,
            timeout_policy,
            request_token,
        );
        self.metrics.record_sw_start(start_result);
        if start_result == ExternalRequestResult::Ok {
            tracing::trace!(
                extension_id = %worker.extension_id,
                worker_version = worker.version_id,
                request_token = %request_token,
                "service worker keepalive acquired"
            );
        } else {
            tracing::warn!(
                extension_id = %worker.extension_id,
                worker_version = worker.version_id,
                request_token = %request_token,
                result = %start_result,
                "external request did not start"
            );
        }

        self.workers.insert_keepalive(ServiceWorkerKeepaliveRecord {
            worker: worker.clone(),
            request_token,
            activity_type,
            detail: detail.to_string(),
            timeout_policy,
            start_result,
        });
        Ok(request_token)
    }

    /// Release a keepalive taken by [`Self::increment_service_worker_keepalive`].
    pub fn decrement_service_worker_keepalive(
        &mut self,
        worker: &WorkerId,
        request_token: RequestToken,
        activity_type: ActivityType,
        detail: &str,
    ) -> LifecycleResult<()> {
        if !self.extensions.contains_key(&worker.extension_id) {
            tracing::trace!(
                extension_id = %worker.extension_id,
                request_token = %request_token,
                "release for unloaded extension ignored"
            );
            return Ok(());
        }
        if self.workers.take_reaped(request_token) {
            self.metrics.sw_release_after_process_exit += 1;
            tracing::trace!(
                extension_id = %worker.extension_id,
                worker_version = worker.version_id,
                request_token = %request_token,
                "release after render process exit ignored"
            );
            return Ok(());
        }
        let record = self
            .workers
            .take_keepalive(worker, request_token, activity_type, detail)?;
        let finish = self
            .worker_runtime
            .finished_external_request(worker.version_id, request_token);
        self.metrics.record_sw_finish(record.start_result, finish);
        if finish.is_tolerated_finish() {
            tracing::trace!(
                extension_id = %worker.extension_id,
                request_token = %request_token,
                result = %finish,
                "service worker keepalive released"
            );
        } else {
            tracing::warn!(
                extension_id = %worker.extension_id,
                worker_version = worker.version_id,
                request_token = %request_token,
                result = %finish,
                "unexpected external request finish result"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Destroy every context without a handshake and refuse further work.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for extension in self.live_extensions() {
            self.destroy_context(&extension, DestroyReason::Shutdown, true);
        }
        let outstanding = self.workers.keepalive_count();
        self.workers.clear();
        self.network.clear();
        tracing::info!(
            dropped_service_worker_keepalives = outstanding,
            "lifecycle manager shut down"
        );
        self.notify(LifecycleEvent::Shutdown);
    }
}
