//! Identifiers and closed enums shared by every lifecycle component.
//!
//! Everything here is plain data: extension and view identifiers, the
//! activity taxonomy used to label keepalive claims, the view-kind enum that
//! decides whether a view may hold a claim, and the worker identity used by
//! the service-worker tracker.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Extension identity
// =============================================================================

/// Opaque, stable identifier for an extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionId(String);

impl ExtensionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExtensionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How an extension hosts its background logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundKind {
    /// No background context at all.
    None,
    /// Persistent page: created at load, never suspended.
    Persistent,
    /// Lazy event page: created on demand, suspended when idle.
    EventPage,
    /// Event-driven service worker; lifetime owned by the worker runtime.
    ServiceWorker,
}

impl BackgroundKind {
    /// Whether contexts of this kind participate in the idle/suspend handshake.
    #[must_use]
    pub const fn is_lazy(self) -> bool {
        matches!(self, Self::EventPage)
    }

    /// Whether the lifecycle manager hosts a page-based context for this kind.
    #[must_use]
    pub const fn has_page(self) -> bool {
        matches!(self, Self::Persistent | Self::EventPage)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Persistent => "persistent",
            Self::EventPage => "event_page",
            Self::ServiceWorker => "service_worker",
        }
    }
}

impl fmt::Display for BackgroundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the lifecycle manager needs to know about a loaded extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub id: ExtensionId,
    pub background: BackgroundKind,
    /// URL the background context is created at.
    #[serde(default)]
    pub url: String,
}

impl ExtensionInfo {
    #[must_use]
    pub fn new(id: impl Into<String>, background: BackgroundKind) -> Self {
        let id = ExtensionId::new(id);
        let url = format!("extension://{id}/_generated_background_page.html");
        Self { id, background, url }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Identifier of one live background context instance.
///
/// A fresh value is allocated every time a context is created, so callbacks
/// that captured an older instance can tell it has been replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextInstanceId(pub u64);

impl fmt::Display for ContextInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

// =============================================================================
// Activities
// =============================================================================

/// Why a keepalive claim is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// An in-flight extension API call.
    ApiFunction,
    /// Devtools attached to the background context.
    DevTools,
    /// An event being dispatched to the context.
    Event,
    /// Media playback (e.g. picture-in-picture).
    Media,
    /// A one-shot message exchange.
    Message,
    /// A long-lived message port.
    MessagePort,
    /// A modal dialog shown by the context.
    ModalDialog,
    /// A network request issued by the background document.
    Network,
    /// Claims taken by the lifecycle manager itself.
    ProcessManager,
}

impl ActivityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiFunction => "api_function",
            Self::DevTools => "dev_tools",
            Self::Event => "event",
            Self::Media => "media",
            Self::Message => "message",
            Self::MessagePort => "message_port",
            Self::ModalDialog => "modal_dialog",
            Self::Network => "network",
            Self::ProcessManager => "process_manager",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_function" => Ok(Self::ApiFunction),
            "dev_tools" => Ok(Self::DevTools),
            "event" => Ok(Self::Event),
            "media" => Ok(Self::Media),
            "message" => Ok(Self::Message),
            "message_port" => Ok(Self::MessagePort),
            "modal_dialog" => Ok(Self::ModalDialog),
            "network" => Ok(Self::Network),
            "process_manager" => Ok(Self::ProcessManager),
            other => Err(format!("unknown activity type: {other}")),
        }
    }
}

/// Detail string for claims held by a registered view.
pub const DETAIL_RENDER_FRAME: &str = "render_frame";
/// Detail string for the synthetic claim used to invalidate a suspend.
pub const DETAIL_CANCEL_SUSPEND: &str = "cancel_suspend";
/// Detail string for picture-in-picture media claims.
pub const DETAIL_PICTURE_IN_PICTURE: &str = "picture_in_picture";

/// One keepalive claim: an activity type plus free-form diagnostic detail.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Activity {
    pub activity_type: ActivityType,
    pub detail: String,
}

impl Activity {
    #[must_use]
    pub fn new(activity_type: ActivityType, detail: impl Into<String>) -> Self {
        Self {
            activity_type,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            f.write_str(self.activity_type.as_str())
        } else {
            write!(f, "{}:{}", self.activity_type, self.detail)
        }
    }
}

// =============================================================================
// Views
// =============================================================================

/// Identifier of a front-end view (one renderer frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub u64);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

/// Kind of front-end view hosting extension content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    AppWindow,
    BackgroundContents,
    Component,
    ExtensionGuest,
    ExtensionPopup,
    TabContents,
    /// The background context's own document.
    ExtensionBackgroundPage,
    OffscreenDocument,
    ExtensionSidePanel,
}

impl ViewKind {
    /// Whether a view of this kind keeps the lazy background context alive.
    ///
    /// The background document itself and invisible documents never do, or a
    /// context could keep itself alive forever.
    #[must_use]
    pub const fn can_hold_keepalive(self) -> bool {
        match self {
            Self::AppWindow
            | Self::BackgroundContents
            | Self::Component
            | Self::ExtensionGuest
            | Self::ExtensionPopup
            | Self::TabContents => true,
            Self::ExtensionBackgroundPage | Self::OffscreenDocument | Self::ExtensionSidePanel => {
                false
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppWindow => "app_window",
            Self::BackgroundContents => "background_contents",
            Self::Component => "component",
            Self::ExtensionGuest => "extension_guest",
            Self::ExtensionPopup => "extension_popup",
            Self::TabContents => "tab_contents",
            Self::ExtensionBackgroundPage => "extension_background_page",
            Self::OffscreenDocument => "offscreen_document",
            Self::ExtensionSidePanel => "extension_side_panel",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Service workers
// =============================================================================

/// Identifier of a renderer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub i32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process-{}", self.0)
    }
}

/// Identity of one running service worker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    pub extension_id: ExtensionId,
    pub render_process_id: ProcessId,
    pub version_id: i64,
    pub thread_id: i32,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/v{}/t{}",
            self.extension_id, self.render_process_id, self.version_id, self.thread_id
        )
    }
}

/// Token pairing a service-worker keepalive increment with its decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(Uuid);

impl RequestToken {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// How long the worker runtime may go without progress before abandoning an
/// external request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// The runtime's standard request timeout applies.
    Default,
    /// The request may keep the worker alive indefinitely.
    DoesNotTimeout,
}

/// Outcome reported by the worker runtime for an external request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalRequestResult {
    Ok,
    BadRequestId,
    WorkerNotFound,
    WorkerNotRunning,
    NullContext,
}

impl ExternalRequestResult {
    /// Whether a finish outcome is acceptable.
    ///
    /// The worker may have been killed independently of us (`WorkerNotRunning`)
    /// or its context torn down first during shutdown (`NullContext`).
    #[must_use]
    pub const fn is_tolerated_finish(self) -> bool {
        matches!(self, Self::Ok | Self::WorkerNotRunning | Self::NullContext)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::BadRequestId => "bad_request_id",
            Self::WorkerNotFound => "worker_not_found",
            Self::WorkerNotRunning => "worker_not_running",
            Self::NullContext => "null_context",
        }
    }
}

impl fmt::Display for ExternalRequestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
