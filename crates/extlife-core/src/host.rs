//! Outbound collaborator interfaces.
//!
//! The manager never talks to processes, documents or worker runtimes
//! directly; it calls these traits. Production wires them to the embedder,
//! tests use the recording fakes in [`crate::harness`].

use crate::suspend::RemoteMessage;
use crate::types::{
    ContextInstanceId, ExtensionId, ExternalRequestResult, RequestToken, TimeoutPolicy, ViewId,
};

/// The remote side of a handshake message could not be reached.
///
/// Not an error for the manager: the context is going away anyway, so the
/// send is treated as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("remote runtime unavailable")]
pub struct RemoteUnavailable;

/// Creates and destroys background contexts and closes views.
pub trait ContextHost: Send {
    /// Start the background context for `extension` at `url`.
    fn create_context(&mut self, extension: &ExtensionId, instance: ContextInstanceId, url: &str);

    /// Tear the context down. Must not call back into the manager.
    fn destroy_context(&mut self, extension: &ExtensionId, instance: ContextInstanceId);

    /// Close a view ahead of suspending its extension's context.
    fn close_view(&mut self, extension: &ExtensionId, view: ViewId);
}

/// Delivers handshake directives to the process hosting a lazy context.
pub trait RemoteRuntime: Send {
    fn send(&mut self, message: RemoteMessage) -> Result<(), RemoteUnavailable>;
}

/// Worker runtime bookkeeping for external requests.
pub trait WorkerRuntime: Send {
    fn starting_external_request(
        &mut self,
        version_id: i64,
        timeout: TimeoutPolicy,
        token: RequestToken,
    ) -> ExternalRequestResult;

    fn finished_external_request(
        &mut self,
        version_id: i64,
        token: RequestToken,
    ) -> ExternalRequestResult;
}

/// Host that creates nothing; for embedders that only track bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl ContextHost for NullHost {
    fn create_context(&mut self, _: &ExtensionId, _: ContextInstanceId, _: &str) {}
    fn destroy_context(&mut self, _: &ExtensionId, _: ContextInstanceId) {}
    fn close_view(&mut self, _: &ExtensionId, _: ViewId) {}
}
