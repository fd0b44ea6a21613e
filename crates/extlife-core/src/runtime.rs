//! Tokio driver for the lifecycle manager.
//!
//! The manager runs on a single task and every entry point reaches it as a
//! [`Command`] over an unbounded channel, so calls, timer expiries and
//! remote acknowledgements are serialized without locking. Timers are
//! spawned sleeps that post [`Command::RunTask`] back to the same channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::error::{Error, Result};
use crate::host::{ContextHost, RemoteRuntime, RemoteUnavailable, WorkerRuntime};
use crate::manager::{Collaborators, LifecycleManager};
use crate::scheduler::{ScheduledTask, TaskScheduler};
use crate::suspend::RemoteMessage;
use crate::telemetry::MetricsSnapshot;
use crate::types::{
    ActivityType, ContextInstanceId, ExtensionId, ExtensionInfo, RequestToken, TimeoutPolicy,
    ViewId, ViewKind, WorkerId,
};

type ManagerCall = Box<dyn FnOnce(&mut LifecycleManager) + Send>;

enum Command {
    Call(ManagerCall),
    RunTask(ScheduledTask),
    Shutdown(oneshot::Sender<()>),
}

fn stopped() -> Error {
    Error::Runtime("lifecycle service stopped".to_string())
}

// =============================================================================
// Scheduler
// =============================================================================

/// [`TaskScheduler`] backed by `tokio::time::sleep`.
///
/// Holds only a weak sender: pending timers do not keep the service alive
/// once every [`LifecycleHandle`] is gone.
#[derive(Debug)]
pub struct TokioScheduler {
    tx: mpsc::WeakUnboundedSender<Command>,
    epoch: Instant,
}

impl TaskScheduler for TokioScheduler {
    fn post_delayed(&mut self, delay: Duration, task: ScheduledTask) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                if tx.send(Command::RunTask(task)).is_err() {
                    tracing::trace!("timer fired after lifecycle service stopped");
                }
            }
        });
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call(_) => f.write_str("Call"),
            Self::RunTask(task) => f.debug_tuple("RunTask").field(task).finish(),
            Self::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

// =============================================================================
// Remote channel
// =============================================================================

/// [`RemoteRuntime`] that forwards handshake messages over a channel.
///
/// The receiving side plays the remote context and answers through
/// [`LifecycleHandle::on_should_suspend_ack`] and
/// [`LifecycleHandle::on_suspend_ack`]. Dropping the receiver makes every
/// send fail with [`RemoteUnavailable`].
#[derive(Debug, Clone)]
pub struct ChannelRemote {
    tx: mpsc::UnboundedSender<RemoteMessage>,
}

impl ChannelRemote {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RemoteMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RemoteRuntime for ChannelRemote {
    fn send(&mut self, message: RemoteMessage) -> std::result::Result<(), RemoteUnavailable> {
        self.tx.send(message).map_err(|_| RemoteUnavailable)
    }
}

// =============================================================================
// Service
// =============================================================================

/// Cloneable handle to a running lifecycle service.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    tx: mpsc::UnboundedSender<Command>,
}

/// Start the lifecycle service on the current tokio runtime.
///
/// The service stops on [`LifecycleHandle::shutdown`] or when every handle
/// has been dropped; either way the manager's own shutdown runs.
pub fn spawn_lifecycle_service(
    config: LifecycleConfig,
    host: Box<dyn ContextHost>,
    remote: Box<dyn RemoteRuntime>,
    workers: Box<dyn WorkerRuntime>,
) -> (LifecycleHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = TokioScheduler {
        tx: tx.downgrade(),
        epoch: Instant::now(),
    };
    let manager = LifecycleManager::new(
        config,
        Collaborators {
            host,
            remote,
            workers,
            scheduler: Box::new(scheduler),
        },
    );
    let join = tokio::spawn(run_service(manager, rx));
    (LifecycleHandle { tx }, join)
}

async fn run_service(mut manager: LifecycleManager, mut rx: mpsc::UnboundedReceiver<Command>) {
    tracing::debug!("lifecycle service started");
    while let Some(command) = rx.recv().await {
        match command {
            Command::Call(call) => call(&mut manager),
            Command::RunTask(task) => manager.run_task(task),
            Command::Shutdown(done) => {
                manager.shutdown();
                let _ = done.send(());
                break;
            }
        }
    }
    manager.shutdown();
    tracing::debug!("lifecycle service stopped");
}

impl LifecycleHandle {
    /// Run `f` against the manager on the service task and return its result.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut LifecycleManager) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let call: ManagerCall = Box::new(move |manager| {
            let _ = reply_tx.send(f(manager));
        });
        self.tx.send(Command::Call(call)).map_err(|_| stopped())?;
        reply_rx.await.map_err(|_| stopped())
    }

    /// Shut the manager down and stop the service. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done_tx)).is_err() {
            return Ok(());
        }
        // A shutdown queued ahead of ours stops the service without answering.
        let _ = done_rx.await;
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn on_extension_loaded(&self, info: ExtensionInfo) -> Result<()> {
        Ok(self.call(move |m| m.on_extension_loaded(info)).await??)
    }

    pub async fn on_extension_unloaded(&self, extension: ExtensionId) -> Result<()> {
        self.call(move |m| m.on_extension_unloaded(&extension)).await
    }

    pub async fn on_system_ready(&self) -> Result<()> {
        self.call(LifecycleManager::on_system_ready).await
    }

    pub async fn wake_context(&self, extension: ExtensionId) -> Result<bool> {
        Ok(self.call(move |m| m.wake_context(&extension)).await??)
    }

    pub async fn create_background_context(
        &self,
        extension: ExtensionId,
    ) -> Result<ContextInstanceId> {
        Ok(self
            .call(move |m| m.create_background_context(&extension))
            .await??)
    }

    pub async fn request_suspend(&self, extension: ExtensionId) -> Result<bool> {
        Ok(self.call(move |m| m.request_suspend(&extension)).await??)
    }

    pub async fn increment_lazy_keepalive(
        &self,
        extension: ExtensionId,
        activity_type: ActivityType,
        detail: impl Into<String>,
    ) -> Result<()> {
        let detail = detail.into();
        Ok(self
            .call(move |m| m.increment_lazy_keepalive(&extension, activity_type, &detail))
            .await??)
    }

    pub async fn decrement_lazy_keepalive(
        &self,
        extension: ExtensionId,
        activity_type: ActivityType,
        detail: impl Into<String>,
    ) -> Result<()> {
        let detail = detail.into();
        Ok(self
            .call(move |m| m.decrement_lazy_keepalive(&extension, activity_type, &detail))
            .await??)
    }

    pub async fn register_view(
        &self,
        extension: ExtensionId,
        view: ViewId,
        kind: ViewKind,
    ) -> Result<()> {
        Ok(self
            .call(move |m| m.register_view(&extension, view, kind))
            .await??)
    }

    pub async fn unregister_view(&self, view: ViewId) -> Result<()> {
        Ok(self.call(move |m| m.unregister_view(view)).await??)
    }

    pub async fn on_should_suspend_ack(&self, extension: ExtensionId, sequence_id: u64) -> Result<()> {
        self.call(move |m| m.on_should_suspend_ack(&extension, sequence_id))
            .await
    }

    pub async fn on_suspend_ack(&self, extension: ExtensionId, sequence_id: u64) -> Result<()> {
        self.call(move |m| m.on_suspend_ack(&extension, sequence_id))
            .await
    }

    pub async fn register_service_worker(&self, worker: WorkerId) -> Result<Uuid> {
        Ok(self.call(move |m| m.register_service_worker(worker)).await??)
    }

    pub async fn increment_service_worker_keepalive(
        &self,
        worker: WorkerId,
        timeout_policy: TimeoutPolicy,
        activity_type: ActivityType,
        detail: impl Into<String>,
    ) -> Result<RequestToken> {
        let detail = detail.into();
        Ok(self
            .call(move |m| {
                m.increment_service_worker_keepalive(&worker, timeout_policy, activity_type, &detail)
            })
            .await??)
    }

    pub async fn decrement_service_worker_keepalive(
        &self,
        worker: WorkerId,
        request_token: RequestToken,
        activity_type: ActivityType,
        detail: impl Into<String>,
    ) -> Result<()> {
        let detail = detail.into();
        Ok(self
            .call(move |m| {
                m.decrement_service_worker_keepalive(&worker, request_token, activity_type, &detail)
            })
            .await??)
    }

    pub async fn has_context(&self, extension: ExtensionId) -> Result<bool> {
        self.call(move |m| m.has_context(&extension)).await
    }

    pub async fn lazy_keepalive_count(&self, extension: ExtensionId) -> Result<Option<usize>> {
        self.call(move |m| m.lazy_keepalive_count(&extension)).await
    }

    pub async fn metrics_snapshot(&self) -> Result<MetricsSnapshot> {
        self.call(|m| m.metrics_snapshot()).await
    }
}
