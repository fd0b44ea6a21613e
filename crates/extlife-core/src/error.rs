//! Error types for extlife-core

use std::fmt::Write;
use thiserror::Error;

use crate::types::{ActivityType, BackgroundKind, ExtensionId, RequestToken, ViewId, WorkerId};

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for extlife-core
#[derive(Error, Debug)]
pub enum Error {
    /// Lifecycle contract violations
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Scenario replay errors
    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (service stopped, channel failures, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Lifecycle(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Scenario(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Validate config", "extlife config check <path>")
                    .alternative("Verify the file exists and is readable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .command("Validate JSON", "python -m json.tool < input.json")
                    .alternative("Check for trailing commas or invalid UTF-8."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("The lifecycle service stopped. Restart it and retry.")
                    .command("Replay with debug logs", "RUST_LOG=extlife_core=debug extlife replay <scenario>")
                    .alternative("Check logs for a shutdown that raced with the request."),
            ),
        }
    }
}

/// Contract violations detected by the lifecycle manager.
///
/// These are caller bugs (unbalanced bookkeeping, unknown parents), not
/// recoverable runtime conditions. Expected races never produce one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("extension {0} is not loaded")]
    UnknownExtension(ExtensionId),

    #[error("keepalive for {extension} released ({activity_type}) with no outstanding claims")]
    UnbalancedDecrement {
        extension: ExtensionId,
        activity_type: ActivityType,
    },

    #[error("no keepalive record exists for {0}")]
    NoRecord(ExtensionId),

    #[error("background context of {extension} ({kind}) cannot be suspended")]
    NotSuspendable {
        extension: ExtensionId,
        kind: BackgroundKind,
    },

    #[error("extension {extension} has a {kind} background, expected {expected}")]
    WrongBackgroundKind {
        extension: ExtensionId,
        kind: BackgroundKind,
        expected: BackgroundKind,
    },

    #[error("extension {extension} has a {kind} background and hosts no background page")]
    NoBackgroundPage {
        extension: ExtensionId,
        kind: BackgroundKind,
    },

    #[error("background contexts are not allowed for {0}")]
    ContextNotAllowed(ExtensionId),

    #[error("{view} is registered to {registered}, not {requested}")]
    ViewExtensionMismatch {
        view: ViewId,
        registered: ExtensionId,
        requested: ExtensionId,
    },

    #[error("duplicate network request id {0}")]
    DuplicateNetworkRequest(u64),

    #[error("service worker {0} is not registered")]
    UnknownWorker(WorkerId),

    #[error("unknown service worker keepalive token {0}")]
    UnknownKeepaliveToken(RequestToken),

    #[error("service worker keepalive {token} released with mismatched {field}: held {held}, released {released}")]
    KeepaliveMismatch {
        token: RequestToken,
        field: &'static str,
        held: String,
        released: String,
    },

    #[error("lifecycle manager is shut down")]
    ShutDown,
}

impl LifecycleError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::UnknownExtension(_) => {
                Remediation::new("Load the extension before registering activity for it.")
                    .command("Inspect scenario", "extlife replay <scenario> --format pretty")
                    .alternative("Check for activity arriving after an unload.")
            }
            Self::UnbalancedDecrement { .. } | Self::NoRecord(_) => Remediation::new(
                "Keepalive bookkeeping is out of sync: a claim was released twice or never taken.",
            )
            .command("Trace claims", "RUST_LOG=extlife_core=trace extlife replay <scenario>")
            .alternative("Pair every increment with exactly one decrement using the same activity."),
            Self::NotSuspendable { .. }
            | Self::WrongBackgroundKind { .. }
            | Self::NoBackgroundPage { .. } => Remediation::new(
                "The operation does not apply to this background kind.",
            )
            .command("Show default config", "extlife config default")
            .alternative("Only event pages take part in the suspend handshake."),
            Self::ContextNotAllowed(_) => {
                Remediation::new("Background contexts are disabled by configuration.")
                    .command("Show default config", "extlife config default")
                    .alternative("Set lifecycle.background_contexts_allowed = true.")
            }
            Self::ViewExtensionMismatch { .. } => {
                Remediation::new("Unregister the view before reusing its id for another extension.")
                    .command("Inspect scenario", "extlife replay <scenario> --format pretty")
            }
            Self::DuplicateNetworkRequest(_) => {
                Remediation::new("Network request ids must be unique while in flight.")
                    .command("Inspect scenario", "extlife replay <scenario> --format pretty")
            }
            Self::UnknownWorker(_)
            | Self::UnknownKeepaliveToken(_)
            | Self::KeepaliveMismatch { .. } => Remediation::new(
                "Release service-worker keepalives with the exact token, worker, activity and detail returned at acquisition.",
            )
            .command("Trace claims", "RUST_LOG=extlife_core=trace extlife replay <scenario>"),
            Self::ShutDown => Remediation::new("The manager has shut down; create a new one.")
                .command("Replay", "extlife replay <scenario>"),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the syntax and retry.")
                .command("Validate config", "extlife config check <path>")
                .alternative("Start from the output of `extlife config default`."),
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
                    .command("Show default config", "extlife config default")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Validate config", "extlife config check <path>")
                    .alternative("Timer delays must be greater than zero.")
            }
        }
    }
}

/// Scenario replay errors
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Failed to parse scenario: {0}")]
    ParseFailed(String),

    #[error("Step {step} ({op}) failed: {source}")]
    StepFailed {
        step: usize,
        op: String,
        #[source]
        source: LifecycleError,
    },

    #[error("Step {step} expectation failed: {message}")]
    ExpectationFailed { step: usize, message: String },
}

impl ScenarioError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ParseFailed(_) => Remediation::new("Fix the scenario TOML and retry.")
                .command("Replay", "extlife replay <scenario>")
                .alternative("Every step needs an `op` field."),
            Self::StepFailed { source, .. } => source.remediation(),
            Self::ExpectationFailed { .. } => {
                Remediation::new("The manager state diverged from the scenario's expectation.")
                    .command("Show transcript", "extlife replay <scenario> --format pretty")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
