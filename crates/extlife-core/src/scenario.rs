//! Declarative lifecycle scenarios.
//!
//! A scenario is a TOML file listing extensions and an ordered series of
//! steps. Replay drives a [`TestRig`] on a virtual clock, so the same file
//! always produces the same transcript of observer events and remote
//! messages.
//!
//! ```toml
//! name = "idle event page suspends"
//! auto_ack = true
//!
//! [config]
//! idle_delay_ms = 1000
//!
//! [[extension]]
//! id = "lazy"
//! background = "event_page"
//!
//! [[step]]
//! op = "wake"
//! extension = "lazy"
//!
//! [[step]]
//! op = "advance"
//! by = "1s"
//!
//! [[step]]
//! op = "expect"
//! extension = "lazy"
//! has_context = false
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result, ScenarioError};
use crate::harness::{HostCall, TestRig};
use crate::ledger::ActivityMultiset;
use crate::observer::LifecycleEvent;
use crate::suspend::{RemoteMessage, SuspendPhase};
use crate::telemetry::MetricsSnapshot;
use crate::types::{
    ActivityType, BackgroundKind, ExtensionId, ExtensionInfo, ProcessId, RequestToken,
    TimeoutPolicy, ViewId, ViewKind, WorkerId,
};

// ---------------------------------------------------------------------------
// Scenario types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Answer every `ShouldSuspend` and `Suspend` as soon as it is sent.
    #[serde(default)]
    pub auto_ack: bool,
    #[serde(default)]
    pub config: LifecycleConfig,
    /// Extensions loaded before the first step.
    #[serde(default, rename = "extension")]
    pub extensions: Vec<ScenarioExtension>,
    #[serde(default, rename = "step")]
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioExtension {
    pub id: ExtensionId,
    pub background: BackgroundKind,
    #[serde(default)]
    pub url: Option<String>,
}

impl ScenarioExtension {
    fn info(&self) -> ExtensionInfo {
        let info = ExtensionInfo::new(self.id.as_str(), self.background);
        match &self.url {
            Some(url) => info.with_url(url.clone()),
            None => info,
        }
    }
}

/// Identity of a service worker as written in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioWorker {
    pub extension: ExtensionId,
    #[serde(default = "default_process")]
    pub process: i32,
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub thread: i32,
}

fn default_process() -> i32 {
    1
}

fn default_version() -> i64 {
    1
}

impl ScenarioWorker {
    fn id(&self) -> WorkerId {
        WorkerId {
            extension_id: self.extension.clone(),
            render_process_id: ProcessId(self.process),
            version_id: self.version,
            thread_id: self.thread,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    #[serde(flatten)]
    pub action: StepAction,
    /// The step must fail with a lifecycle error.
    #[serde(default)]
    pub expect_error: bool,
}

/// One scripted input to the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepAction {
    SystemReady,
    Load {
        extension: ExtensionId,
        background: BackgroundKind,
        #[serde(default)]
        url: Option<String>,
    },
    Unload {
        extension: ExtensionId,
    },
    Wake {
        extension: ExtensionId,
    },
    CreateContext {
        extension: ExtensionId,
    },
    RequestSuspend {
        extension: ExtensionId,
    },
    CancelSuspend {
        extension: ExtensionId,
    },
    ContextGone {
        extension: ExtensionId,
    },
    Increment {
        extension: ExtensionId,
        activity: ActivityType,
        #[serde(default)]
        detail: String,
    },
    Decrement {
        extension: ExtensionId,
        activity: ActivityType,
        #[serde(default)]
        detail: String,
    },
    RegisterView {
        extension: ExtensionId,
        view: u64,
        kind: ViewKind,
    },
    UnregisterView {
        view: u64,
    },
    NetworkStarted {
        view: u64,
        request: u64,
    },
    NetworkDone {
        view: u64,
        request: u64,
    },
    DevtoolsAttached {
        extension: ExtensionId,
    },
    DevtoolsDetached {
        extension: ExtensionId,
    },
    /// Acknowledge `ShouldSuspend`; defaults to the latest id sent to the
    /// extension.
    AckShouldSuspend {
        extension: ExtensionId,
        #[serde(default)]
        sequence: Option<u64>,
    },
    AckSuspend {
        extension: ExtensionId,
        #[serde(default)]
        sequence: Option<u64>,
    },
    Advance {
        #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
        by: Duration,
    },
    RemoteAvailable {
        available: bool,
    },
    RegisterWorker {
        #[serde(flatten)]
        worker: ScenarioWorker,
    },
    UnregisterWorker {
        #[serde(flatten)]
        worker: ScenarioWorker,
    },
    /// Take a service-worker keepalive and remember its token as `label`.
    WorkerKeepalive {
        label: String,
        #[serde(flatten)]
        worker: ScenarioWorker,
        activity: ActivityType,
        #[serde(default)]
        detail: String,
        #[serde(default)]
        timeout: Option<TimeoutPolicy>,
    },
    /// Release the keepalive stored under `label`.
    WorkerRelease {
        label: String,
    },
    RenderProcessExited {
        process: i32,
    },
    Shutdown,
    Expect(Expectation),
}

impl StepAction {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SystemReady => "system_ready",
            Self::Load { .. } => "load",
            Self::Unload { .. } => "unload",
            Self::Wake { .. } => "wake",
            Self::CreateContext { .. } => "create_context",
            Self::RequestSuspend { .. } => "request_suspend",
            Self::CancelSuspend { .. } => "cancel_suspend",
            Self::ContextGone { .. } => "context_gone",
            Self::Increment { .. } => "increment",
            Self::Decrement { .. } => "decrement",
            Self::RegisterView { .. } => "register_view",
            Self::UnregisterView { .. } => "unregister_view",
            Self::NetworkStarted { .. } => "network_started",
            Self::NetworkDone { .. } => "network_done",
            Self::DevtoolsAttached { .. } => "devtools_attached",
            Self::DevtoolsDetached { .. } => "devtools_detached",
            Self::AckShouldSuspend { .. } => "ack_should_suspend",
            Self::AckSuspend { .. } => "ack_suspend",
            Self::Advance { .. } => "advance",
            Self::RemoteAvailable { .. } => "remote_available",
            Self::RegisterWorker { .. } => "register_worker",
            Self::UnregisterWorker { .. } => "unregister_worker",
            Self::WorkerKeepalive { .. } => "worker_keepalive",
            Self::WorkerRelease { .. } => "worker_release",
            Self::RenderProcessExited { .. } => "render_process_exited",
            Self::Shutdown => "shutdown",
            Self::Expect(_) => "expect",
        }
    }
}

/// State assertions checked by an `expect` step. Unset fields are not
/// checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Expectation {
    pub extension: Option<ExtensionId>,
    pub has_context: Option<bool>,
    pub closing: Option<bool>,
    pub keepalive_count: Option<usize>,
    pub phase: Option<SuspendPhase>,
    /// Total `ShouldSuspend` messages delivered so far.
    pub should_suspend: Option<usize>,
    pub suspend: Option<usize>,
    pub cancel_suspend: Option<usize>,
    pub contexts_created: Option<u64>,
    pub contexts_destroyed: Option<u64>,
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Result of replaying a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub name: String,
    pub steps: Vec<StepRecord>,
    pub host_calls: Vec<HostCall>,
    pub metrics: MetricsSnapshot,
    pub extensions: Vec<ExtensionState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub op: &'static str,
    /// Virtual time after the step, in milliseconds.
    pub at_ms: u64,
    /// `ok`, or the lifecycle error an `expect_error` step produced.
    pub outcome: String,
    pub events: Vec<LifecycleEvent>,
    pub messages: Vec<RemoteMessage>,
}

/// Final per-extension state.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionState {
    pub extension_id: ExtensionId,
    pub has_context: bool,
    pub closing: bool,
    pub phase: Option<SuspendPhase>,
    pub keepalive_count: Option<usize>,
    pub activities: ActivityMultiset,
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl Scenario {
    /// Load a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a scenario.
    pub fn from_toml(text: &str) -> Result<Self> {
        let scenario: Self =
            toml::from_str(text).map_err(|e| ScenarioError::ParseFailed(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;

        let mut seen = HashSet::new();
        for extension in &self.extensions {
            if !seen.insert(&extension.id) {
                return Err(ScenarioError::ParseFailed(format!(
                    "duplicate extension '{}' in scenario '{}'",
                    extension.id, self.name
                ))
                .into());
            }
        }

        // Every release must name a keepalive taken by an earlier step.
        let mut labels = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            match &step.action {
                StepAction::WorkerKeepalive { label, .. } => {
                    labels.insert(label.as_str());
                }
                StepAction::WorkerRelease { label } if !labels.contains(label.as_str()) => {
                    return Err(ScenarioError::ParseFailed(format!(
                        "step {index} releases unknown keepalive '{label}'"
                    ))
                    .into());
                }
                _ => {}
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Replay every step against a fresh manager.
    pub fn replay(&self) -> Result<Transcript> {
        let _span = crate::lifecycle_span!("scenario_replay", scenario = %self.name).entered();
        let mut replay = Replay::new(self);
        for extension in &self.extensions {
            replay
                .rig
                .manager
                .on_extension_loaded(extension.info())
                .map_err(|source| ScenarioError::StepFailed {
                    step: 0,
                    op: "load".to_string(),
                    source,
                })?;
        }
        replay.rig.observer.take_events();

        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let outcome = match (replay.apply(index, &step.action)?, step.expect_error) {
                (Ok(()), false) => "ok".to_string(),
                (Err(err), true) => err.to_string(),
                (Err(source), false) => {
                    return Err(ScenarioError::StepFailed {
                        step: index,
                        op: step.action.name().to_string(),
                        source,
                    }
                    .into());
                }
                (Ok(()), true) => {
                    return Err(ScenarioError::ExpectationFailed {
                        step: index,
                        message: format!("{} succeeded but an error was expected", step.action.name()),
                    }
                    .into());
                }
            };
            if self.auto_ack {
                replay.auto_ack();
            }
            tracing::debug!(step = index, op = step.action.name(), outcome = %outcome, "scenario step");
            steps.push(StepRecord {
                index,
                op: step.action.name(),
                at_ms: replay.rig.now().as_millis() as u64,
                outcome,
                events: replay.rig.observer.take_events(),
                messages: replay.new_messages(),
            });
        }

        Ok(replay.finish(self, steps))
    }
}

struct Replay {
    rig: TestRig,
    tokens: HashMap<String, (WorkerId, RequestToken, ActivityType, String)>,
    reported: usize,
    acked: usize,
}

impl Replay {
    fn new(scenario: &Scenario) -> Self {
        Self {
            rig: TestRig::new(scenario.config.clone()),
            tokens: HashMap::new(),
            reported: 0,
            acked: 0,
        }
    }

    fn latest_sequence(&self, extension: &ExtensionId, suspend: bool) -> Option<u64> {
        self.rig
            .remote
            .messages()
            .iter()
            .rev()
            .find_map(|message| match message {
                RemoteMessage::ShouldSuspend {
                    extension_id,
                    sequence_id,
                } if !suspend && extension_id == extension => Some(*sequence_id),
                RemoteMessage::Suspend {
                    extension_id,
                    sequence_id,
                } if suspend && extension_id == extension => Some(*sequence_id),
                _ => None,
            })
    }

    /// Messages delivered since the previous call.
    fn new_messages(&mut self) -> Vec<RemoteMessage> {
        let messages = self.rig.remote.messages();
        let fresh = messages.get(self.reported..).unwrap_or_default().to_vec();
        self.reported = messages.len();
        fresh
    }

    fn auto_ack(&mut self) {
        loop {
            let messages = self.rig.remote.messages();
            let Some(message) = messages.get(self.acked).cloned() else {
                return;
            };
            self.acked += 1;
            match message {
                RemoteMessage::ShouldSuspend {
                    extension_id,
                    sequence_id,
                } => self.rig.manager.on_should_suspend_ack(&extension_id, sequence_id),
                RemoteMessage::Suspend {
                    extension_id,
                    sequence_id,
                } => self.rig.manager.on_suspend_ack(&extension_id, sequence_id),
                RemoteMessage::CancelSuspend { .. } => {}
            }
        }
    }

    /// Apply one step. The outer error aborts replay; the inner one is the
    /// manager's answer.
    fn apply(
        &mut self,
        index: usize,
        action: &StepAction,
    ) -> Result<std::result::Result<(), LifecycleError>> {
        let manager = &mut self.rig.manager;
        let outcome = match action {
            StepAction::SystemReady => {
                manager.on_system_ready();
                Ok(())
            }
            StepAction::Load {
                extension,
                background,
                url,
            } => {
                let info = ScenarioExtension {
                    id: extension.clone(),
                    background: *background,
                    url: url.clone(),
                }
                .info();
                manager.on_extension_loaded(info)
            }
            StepAction::Unload { extension } => {
                manager.on_extension_unloaded(extension);
                Ok(())
            }
            StepAction::Wake { extension } => manager.wake_context(extension).map(drop),
            StepAction::CreateContext { extension } => {
                manager.create_background_context(extension).map(drop)
            }
            StepAction::RequestSuspend { extension } => manager.request_suspend(extension).map(drop),
            StepAction::CancelSuspend { extension } => manager.cancel_suspend(extension).map(drop),
            StepAction::ContextGone { extension } => {
                manager.on_background_context_gone(extension);
                Ok(())
            }
            StepAction::Increment {
                extension,
                activity,
                detail,
            } => manager.increment_lazy_keepalive(extension, *activity, detail),
            StepAction::Decrement {
                extension,
                activity,
                detail,
            } => manager.decrement_lazy_keepalive(extension, *activity, detail),
            StepAction::RegisterView {
                extension,
                view,
                kind,
            } => manager.register_view(extension, ViewId(*view), *kind),
            StepAction::UnregisterView { view } => manager.unregister_view(ViewId(*view)),
            StepAction::NetworkStarted { view, request } => {
                manager.network_request_started(ViewId(*view), *request)
            }
            StepAction::NetworkDone { view, request } => {
                manager.network_request_done(ViewId(*view), *request)
            }
            StepAction::DevtoolsAttached { extension } => manager.devtools_attached(extension),
            StepAction::DevtoolsDetached { extension } => manager.devtools_detached(extension),
            StepAction::AckShouldSuspend {
                extension,
                sequence,
            } => {
                let seq = sequence.or_else(|| self.latest_sequence(extension, false));
                let seq = seq.ok_or_else(|| missing_message(index, "should_suspend", extension))?;
                self.rig.manager.on_should_suspend_ack(extension, seq);
                Ok(())
            }
            StepAction::AckSuspend {
                extension,
                sequence,
            } => {
                let seq = sequence.or_else(|| self.latest_sequence(extension, true));
                let seq = seq.ok_or_else(|| missing_message(index, "suspend", extension))?;
                self.rig.manager.on_suspend_ack(extension, seq);
                Ok(())
            }
            StepAction::Advance { by } => {
                self.rig.advance(*by);
                Ok(())
            }
            StepAction::RemoteAvailable { available } => {
                self.rig.remote.set_available(*available);
                Ok(())
            }
            StepAction::RegisterWorker { worker } => manager.register_service_worker(worker.id()).map(drop),
            StepAction::UnregisterWorker { worker } => {
                manager.unregister_service_worker(&worker.id());
                Ok(())
            }
            StepAction::WorkerKeepalive {
                label,
                worker,
                activity,
                detail,
                timeout,
            } => {
                let id = worker.id();
                let policy = timeout.unwrap_or(TimeoutPolicy::Default);
                manager
                    .increment_service_worker_keepalive(&id, policy, *activity, detail)
                    .map(|token| {
                        self.tokens
                            .insert(label.clone(), (id, token, *activity, detail.clone()));
                    })
            }
            StepAction::WorkerRelease { label } => {
                let (worker, token, activity, detail) =
                    self.tokens.get(label).cloned().ok_or_else(|| {
                        ScenarioError::ExpectationFailed {
                            step: index,
                            message: format!("keepalive '{label}' was never taken"),
                        }
                    })?;
                manager.decrement_service_worker_keepalive(&worker, token, activity, &detail)
            }
            StepAction::RenderProcessExited { process } => {
                manager.on_render_process_exited(ProcessId(*process));
                Ok(())
            }
            StepAction::Shutdown => {
                manager.shutdown();
                Ok(())
            }
            StepAction::Expect(expectation) => {
                self.check(index, expectation)?;
                Ok(())
            }
        };
        Ok(outcome)
    }

    fn check(&self, index: usize, expect: &Expectation) -> Result<()> {
        let manager = &self.rig.manager;
        let mut failures = Vec::new();

        if let Some(extension) = &expect.extension {
            if let Some(want) = expect.has_context {
                compare(&mut failures, "has_context", want, manager.has_context(extension));
            }
            if let Some(want) = expect.closing {
                compare(&mut failures, "closing", want, manager.is_context_closing(extension));
            }
            if let Some(want) = expect.keepalive_count {
                let actual = manager.lazy_keepalive_count(extension).unwrap_or(0);
                compare(&mut failures, "keepalive_count", want, actual);
            }
            if let Some(want) = expect.phase {
                let actual = manager
                    .suspend_phase(extension)
                    .map_or_else(|| "none".to_string(), |phase| phase.to_string());
                compare(&mut failures, "phase", want, actual);
            }
        } else if expect.has_context.is_some()
            || expect.closing.is_some()
            || expect.keepalive_count.is_some()
            || expect.phase.is_some()
        {
            failures.push("per-extension checks need `extension`".to_string());
        }

        for (kind, want) in [
            ("should_suspend", expect.should_suspend),
            ("suspend", expect.suspend),
            ("cancel_suspend", expect.cancel_suspend),
        ] {
            if let Some(want) = want {
                compare(&mut failures, kind, want, self.rig.remote.count(kind));
            }
        }
        let metrics = manager.metrics();
        if let Some(want) = expect.contexts_created {
            compare(&mut failures, "contexts_created", want, metrics.contexts_created);
        }
        if let Some(want) = expect.contexts_destroyed {
            compare(&mut failures, "contexts_destroyed", want, metrics.contexts_destroyed);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ScenarioError::ExpectationFailed {
                step: index,
                message: failures.join("; "),
            }
            .into())
        }
    }

    fn finish(self, scenario: &Scenario, steps: Vec<StepRecord>) -> Transcript {
        let manager = &self.rig.manager;
        let mut ids: Vec<ExtensionId> = scenario
            .extensions
            .iter()
            .map(|extension| extension.id.clone())
            .chain(scenario.steps.iter().filter_map(|step| match &step.action {
                StepAction::Load { extension, .. } => Some(extension.clone()),
                _ => None,
            }))
            .collect();
        ids.sort();
        ids.dedup();

        let extensions = ids
            .into_iter()
            .map(|id| ExtensionState {
                has_context: manager.has_context(&id),
                closing: manager.is_context_closing(&id),
                phase: manager.suspend_phase(&id),
                keepalive_count: manager.lazy_keepalive_count(&id),
                activities: manager.lazy_keepalive_activities(&id),
                extension_id: id,
            })
            .collect();

        Transcript {
            name: scenario.name.clone(),
            steps,
            host_calls: self.rig.host.calls(),
            metrics: manager.metrics_snapshot(),
            extensions,
        }
    }
}

fn compare(failures: &mut Vec<String>, what: &str, expected: impl ToString, actual: impl ToString) {
    let (expected, actual) = (expected.to_string(), actual.to_string());
    if expected != actual {
        failures.push(format!("{what}: expected {expected}, got {actual}"));
    }
}

fn missing_message(index: usize, kind: &str, extension: &ExtensionId) -> ScenarioError {
    ScenarioError::ExpectationFailed {
        step: index,
        message: format!("no {kind} message was sent to '{extension}'"),
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

/// Parse a duration string like "500ms", "10s", "1m30s".
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() || ch == '.' {
            num_buf.push(ch);
            continue;
        }
        let val: f64 = num_buf
            .parse()
            .map_err(|_| format!("Invalid number in duration: '{num_buf}'"))?;
        num_buf.clear();
        let factor = match ch {
            'h' => 3_600_000.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1.0
            }
            'm' => 60_000.0,
            's' => 1_000.0,
            _ => return Err(format!("Unknown duration unit '{ch}' in '{s}'")),
        };
        total_ms += (val * factor) as u64;
    }

    if !num_buf.is_empty() {
        return Err(format!("Duration '{s}' is missing a unit"));
    }
    Ok(Duration::from_millis(total_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn release_of_unknown_label_is_rejected() {
        let text = r#"
name = "bad"

[[step]]
op = "worker_release"
label = "missing"
"#;
        let err = Scenario::from_toml(text).unwrap_err();
        assert!(err.to_string().contains("unknown keepalive"));
    }

    #[test]
    fn duplicate_extension_is_rejected() {
        let text = r#"
name = "dup"

[[extension]]
id = "a"
background = "event_page"

[[extension]]
id = "a"
background = "persistent"
"#;
        assert!(Scenario::from_toml(text).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let text = r#"
name = "zero"

[config]
idle_delay_ms = 0
"#;
        assert!(Scenario::from_toml(text).is_err());
    }

    #[test]
    fn auto_ack_replays_full_handshake() {
        let text = r#"
name = "idle"
auto_ack = true

[config]
idle_delay_ms = 1000

[[extension]]
id = "lazy"
background = "event_page"

[[step]]
op = "wake"
extension = "lazy"

[[step]]
op = "advance"
by = "1s"

[[step]]
op = "expect"
extension = "lazy"
has_context = false
phase = "closed"
should_suspend = 1
suspend = 1
"#;
        let transcript = Scenario::from_toml(text).unwrap().replay().unwrap();
        assert_eq!(transcript.steps.len(), 3);
        assert_eq!(transcript.steps[1].at_ms, 1000);
        assert_eq!(transcript.steps[1].messages.len(), 2);
        assert!(
            transcript.steps[1]
                .events
                .iter()
                .any(|event| event.name() == "context_destroyed")
        );
        assert_eq!(transcript.metrics.contexts_destroyed, 1);
        assert!(!transcript.extensions[0].has_context);
    }

    #[test]
    fn expected_error_is_recorded() {
        let text = r#"
name = "unbalanced"

[[extension]]
id = "lazy"
background = "event_page"

[[step]]
op = "decrement"
extension = "lazy"
activity = "event"
expect_error = true
"#;
        let transcript = Scenario::from_toml(text).unwrap().replay().unwrap();
        assert!(transcript.steps[0].outcome.contains("lazy"));
    }

    #[test]
    fn failed_expectation_aborts() {
        let text = r#"
name = "wrong"

[[extension]]
id = "lazy"
background = "event_page"

[[step]]
op = "expect"
extension = "lazy"
has_context = true
"#;
        let err = Scenario::from_toml(text).unwrap().replay().unwrap_err();
        assert!(err.to_string().contains("has_context"));
    }

    #[test]
    fn worker_keepalive_round_trip_by_label() {
        let text = r#"
name = "worker"

[[extension]]
id = "sw"
background = "service_worker"

[[step]]
op = "register_worker"
extension = "sw"
version = 3

[[step]]
op = "worker_keepalive"
label = "k1"
extension = "sw"
version = 3
activity = "event"
detail = "alarms.onAlarm"

[[step]]
op = "worker_release"
label = "k1"
"#;
        let transcript = Scenario::from_toml(text).unwrap().replay().unwrap();
        assert_eq!(transcript.metrics.sw_start_results.get("ok"), Some(&1));
        assert_eq!(transcript.metrics.sw_finish_after_ok_start.get("ok"), Some(&1));
    }
}
