//! Replays the sample scenarios under `tests/fixtures/` and checks their
//! transcripts.

use std::path::PathBuf;

use extlife_core::Error;
use extlife_core::error::ScenarioError;
use extlife_core::harness::HostCall;
use extlife_core::scenario::Scenario;
use extlife_core::suspend::{RemoteMessage, SuspendPhase};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn replay(name: &str) -> extlife_core::scenario::Transcript {
    let scenario = Scenario::load(&fixture(name)).unwrap();
    scenario.replay().unwrap()
}

#[test]
fn idle_suspend_fixture() {
    let transcript = replay("idle_suspend.toml");
    assert_eq!(transcript.name, "idle event page suspends");
    assert_eq!(transcript.metrics.should_suspend_sent, 1);
    assert_eq!(transcript.metrics.suspend_sent, 1);
    assert_eq!(transcript.metrics.contexts_destroyed, 1);
    assert_eq!(transcript.metrics.stale_acks_dropped, 0);

    let state = &transcript.extensions[0];
    assert!(!state.has_context);
    assert_eq!(state.phase, Some(SuspendPhase::Closed));
    assert_eq!(state.keepalive_count, Some(0));

    assert!(matches!(transcript.host_calls.first(), Some(HostCall::Create { .. })));
    assert!(matches!(transcript.host_calls.last(), Some(HostCall::Destroy { .. })));
}

#[test]
fn cancel_after_suspend_fixture() {
    let transcript = replay("cancel_after_suspend.toml");
    assert_eq!(transcript.metrics.cancel_suspend_sent, 1);
    assert_eq!(transcript.metrics.contexts_destroyed, 0);

    let messages: Vec<&RemoteMessage> = transcript
        .steps
        .iter()
        .flat_map(|step| step.messages.iter())
        .collect();
    let kinds: Vec<&str> = messages.iter().map(|message| message.kind()).collect();
    assert_eq!(
        kinds,
        vec!["should_suspend", "suspend", "cancel_suspend", "should_suspend"]
    );

    // The second idle period carries a fresh sequence id.
    let ids: Vec<u64> = messages
        .iter()
        .filter_map(|message| match message {
            RemoteMessage::ShouldSuspend { sequence_id, .. } => Some(*sequence_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[test]
fn persistent_startup_fixture() {
    let transcript = replay("persistent_startup.toml");
    let rejected: Vec<&str> = transcript
        .steps
        .iter()
        .filter(|step| step.outcome != "ok")
        .map(|step| step.op)
        .collect();
    assert_eq!(rejected, vec!["request_suspend", "create_context"]);
    assert!(transcript.metrics.contexts_created >= 1);
}

#[test]
fn transcript_serializes_to_json() {
    let transcript = replay("idle_suspend.toml");
    let value = serde_json::to_value(&transcript).unwrap();
    assert_eq!(value["steps"][0]["op"], "wake");
    assert_eq!(value["host_calls"][0]["call"], "create");
}

#[test]
fn failed_expectation_reports_step() {
    let scenario = Scenario::from_toml(
        r#"
name = "wrong"

[[extension]]
id = "lazy"
background = "event_page"

[[step]]
op = "wake"
extension = "lazy"

[[step]]
op = "expect"
extension = "lazy"
keepalive_count = 3
"#,
    )
    .unwrap();
    let err = scenario.replay().unwrap_err();
    assert!(matches!(
        err,
        Error::Scenario(ScenarioError::ExpectationFailed { step: 1, .. })
    ));
}

#[test]
fn unexpected_lifecycle_error_fails_replay() {
    let scenario = Scenario::from_toml(
        r#"
name = "unbalanced"

[[extension]]
id = "lazy"
background = "event_page"

[[step]]
op = "decrement"
extension = "lazy"
activity = "event"
"#,
    )
    .unwrap();
    let err = scenario.replay().unwrap_err();
    assert!(matches!(
        err,
        Error::Scenario(ScenarioError::StepFailed { step: 0, .. })
    ));
}
