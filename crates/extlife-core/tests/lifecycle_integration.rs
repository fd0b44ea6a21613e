//! End-to-end lifecycle tests against the deterministic test rig.
//!
//! A. Keepalive balance and idle periods
//! B. Handshake races: late activity, stale acks, explicit cancel
//! C. Unload and shutdown during a handshake
//! D. Views, network requests and devtools
//! E. Late-activity policies and context loss
//! F. Service workers

use std::time::Duration;

use extlife_core::config::{LateActivityPolicy, LifecycleConfig};
use extlife_core::error::LifecycleError;
use extlife_core::harness::{HostCall, TestRig};
use extlife_core::observer::{DestroyReason, LifecycleEvent};
use extlife_core::suspend::{RemoteMessage, SuspendPhase};
use extlife_core::types::{
    Activity, ActivityType, BackgroundKind, ExtensionId, ExtensionInfo, ExternalRequestResult,
    ProcessId, RequestToken, TimeoutPolicy, ViewId, ViewKind, WorkerId,
};

const IDLE: Duration = Duration::from_millis(10_000);
const GRACE: Duration = Duration::from_millis(5_000);

fn lazy() -> ExtensionId {
    ExtensionId::new("lazy")
}

fn rig() -> TestRig {
    rig_with(LifecycleConfig::default())
}

fn rig_with(config: LifecycleConfig) -> TestRig {
    let mut rig = TestRig::new(config);
    rig.manager
        .on_extension_loaded(ExtensionInfo::new("lazy", BackgroundKind::EventPage))
        .unwrap();
    rig.manager.wake_context(&lazy()).unwrap();
    rig
}

fn worker(version: i64) -> WorkerId {
    WorkerId {
        extension_id: ExtensionId::new("sw"),
        render_process_id: ProcessId(10),
        version_id: version,
        thread_id: 1,
    }
}

fn sw_rig() -> TestRig {
    let mut rig = TestRig::new(LifecycleConfig::default());
    rig.manager
        .on_extension_loaded(ExtensionInfo::new("sw", BackgroundKind::ServiceWorker))
        .unwrap();
    rig.manager.register_service_worker(worker(1)).unwrap();
    rig
}

// =============================================================================
// A. Keepalive balance and idle periods
// =============================================================================

#[test]
fn balanced_claims_return_to_zero() {
    let mut rig = rig();
    let m = &mut rig.manager;
    m.increment_lazy_keepalive(&lazy(), ActivityType::Event, "a").unwrap();
    m.increment_lazy_keepalive(&lazy(), ActivityType::Event, "a").unwrap();
    m.increment_lazy_keepalive(&lazy(), ActivityType::ApiFunction, "storage.get").unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(3));
    assert_eq!(
        m.lazy_keepalive_activities(&lazy())
            .count(&Activity::new(ActivityType::Event, "a")),
        2
    );

    m.decrement_lazy_keepalive(&lazy(), ActivityType::Event, "a").unwrap();
    m.decrement_lazy_keepalive(&lazy(), ActivityType::ApiFunction, "storage.get").unwrap();
    m.decrement_lazy_keepalive(&lazy(), ActivityType::Event, "a").unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(0));
    assert!(m.lazy_keepalive_activities(&lazy()).is_empty());
}

#[test]
fn decrement_at_zero_is_an_error() {
    let mut rig = rig();
    let err = rig
        .manager
        .decrement_lazy_keepalive(&lazy(), ActivityType::Event, "")
        .unwrap_err();
    assert!(matches!(err, LifecycleError::UnbalancedDecrement { .. }));
    assert_eq!(rig.manager.lazy_keepalive_count(&lazy()), Some(0));
}

#[test]
fn one_should_suspend_per_idle_period() {
    let mut rig = rig();
    rig.advance(IDLE);
    assert_eq!(rig.remote.count("should_suspend"), 1);

    // Nothing else fires while the first handshake is pending.
    rig.advance(IDLE * 3);
    assert_eq!(rig.remote.count("should_suspend"), 1);
    assert_eq!(rig.manager.suspend_phase(&lazy()), Some(SuspendPhase::ShouldSuspendSent));
}

#[test]
fn busy_context_never_starts_handshake() {
    let mut rig = rig();
    rig.manager
        .increment_lazy_keepalive(&lazy(), ActivityType::MessagePort, "port-1")
        .unwrap();
    rig.advance(IDLE * 5);
    assert_eq!(rig.remote.count("should_suspend"), 0);
    assert!(rig.manager.has_context(&lazy()));
}

#[test]
fn idle_timer_restarts_after_each_release() {
    let mut rig = rig();
    rig.advance(Duration::from_millis(9_000));
    rig.manager
        .increment_lazy_keepalive(&lazy(), ActivityType::Event, "e")
        .unwrap();
    rig.manager
        .decrement_lazy_keepalive(&lazy(), ActivityType::Event, "e")
        .unwrap();

    // The original timer fires at 10s but its sequence id is stale.
    rig.advance(Duration::from_millis(1_000));
    assert_eq!(rig.remote.count("should_suspend"), 0);
    assert_eq!(rig.manager.metrics().stale_timers_dropped, 1);

    rig.advance(Duration::from_millis(9_000));
    assert_eq!(rig.remote.count("should_suspend"), 1);
}

// =============================================================================
// B. Handshake races
// =============================================================================

#[test]
fn activity_between_idle_and_ack_voids_the_ack() {
    let mut rig = rig();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();

    rig.manager
        .increment_lazy_keepalive(&lazy(), ActivityType::Event, "tabs.onUpdated")
        .unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);

    assert_eq!(rig.remote.count("suspend"), 0);
    assert!(!rig.manager.is_context_closing(&lazy()));
    assert_eq!(rig.manager.metrics().stale_acks_dropped, 1);
    assert_eq!(rig.manager.suspend_phase(&lazy()), Some(SuspendPhase::Active));

    // Releasing starts a fresh idle period with a new id.
    rig.manager
        .decrement_lazy_keepalive(&lazy(), ActivityType::Event, "tabs.onUpdated")
        .unwrap();
    rig.advance(IDLE);
    let next = rig.last_should_suspend_seq().unwrap();
    assert_ne!(next, seq);
    assert!(rig.ack_full_handshake(&lazy()));
    assert!(rig.manager.is_context_suspended(&lazy()));
}

#[test]
fn explicit_cancel_after_suspend_sends_one_cancel() {
    let mut rig = rig();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);
    assert!(rig.manager.is_context_closing(&lazy()));

    assert!(rig.manager.cancel_suspend(&lazy()).unwrap());
    assert!(!rig.manager.cancel_suspend(&lazy()).unwrap());
    assert_eq!(rig.remote.count("cancel_suspend"), 1);
    assert!(!rig.manager.is_context_closing(&lazy()));

    // Late ack and grace timer from the canceled handshake are ignored.
    rig.manager.on_suspend_ack(&lazy(), seq);
    assert!(rig.manager.has_context(&lazy()));

    // The synthetic claim started a fresh idle period.
    rig.advance(IDLE);
    assert_eq!(rig.remote.count("should_suspend"), 2);
    let fresh = rig.last_should_suspend_seq().unwrap();
    assert_ne!(fresh, seq);
    assert!(rig.ack_full_handshake(&lazy()));
    assert!(!rig.manager.has_context(&lazy()));
}

#[test]
fn cancel_before_suspend_sends_no_cancel_message() {
    let mut rig = rig();
    rig.advance(IDLE);
    assert!(rig.manager.cancel_suspend(&lazy()).unwrap());
    assert_eq!(rig.remote.count("cancel_suspend"), 0);
    assert_eq!(rig.manager.metrics().suspends_canceled, 1);
    assert!(rig.observer.names().contains(&"suspend_canceled"));
}

#[test]
fn claim_during_should_suspend_counts_as_cancel() {
    let mut rig = rig();
    rig.advance(IDLE);
    rig.observer.take_events();

    rig.manager
        .increment_lazy_keepalive(&lazy(), ActivityType::Event, "alarms.onAlarm")
        .unwrap();
    assert_eq!(rig.manager.metrics().suspends_canceled, 1);
    assert_eq!(rig.observer.names(), vec!["suspend_canceled"]);
    assert_eq!(rig.remote.count("cancel_suspend"), 0);
    assert_eq!(rig.manager.suspend_phase(&lazy()), Some(SuspendPhase::Active));
    assert_eq!(rig.manager.lazy_keepalive_count(&lazy()), Some(1));
}

#[test]
fn claim_after_suspend_sent_cancels_immediately() {
    let mut rig = rig();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);

    rig.manager
        .increment_lazy_keepalive(&lazy(), ActivityType::Message, "runtime.sendMessage")
        .unwrap();
    assert_eq!(rig.remote.count("cancel_suspend"), 1);
    assert_eq!(rig.manager.lazy_keepalive_count(&lazy()), Some(1));

    rig.advance(GRACE);
    assert!(rig.manager.has_context(&lazy()));
    // The busy context does not re-enter the handshake.
    rig.advance(IDLE);
    assert_eq!(rig.remote.count("should_suspend"), 1);
}

#[test]
fn grace_timer_tears_down_silent_context() {
    let mut rig = rig();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);
    rig.advance(GRACE);

    assert!(!rig.manager.has_context(&lazy()));
    assert_eq!(rig.host.destroyed(), 1);
    // The real ack arriving afterwards is a no-op.
    rig.manager.on_suspend_ack(&lazy(), seq);
    assert_eq!(rig.manager.metrics().contexts_destroyed, 1);
}

#[test]
fn duplicate_should_suspend_ack_is_dropped() {
    let mut rig = rig();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);
    rig.manager.on_should_suspend_ack(&lazy(), seq);
    assert_eq!(rig.remote.count("suspend"), 1);
    assert_eq!(rig.manager.metrics().stale_acks_dropped, 1);
}

#[test]
fn unreachable_remote_leaves_context_running() {
    let mut rig = rig();
    rig.remote.set_available(false);
    rig.advance(IDLE);
    assert!(rig.manager.has_context(&lazy()));
    assert_eq!(rig.manager.metrics().remote_unavailable, 1);
    assert_eq!(rig.manager.suspend_phase(&lazy()), Some(SuspendPhase::Active));
}

#[test]
fn request_suspend_runs_without_idle_delay() {
    let mut rig = rig();
    assert!(rig.manager.request_suspend(&lazy()).unwrap());
    rig.advance(Duration::ZERO);
    assert!(rig.ack_full_handshake(&lazy()));
    assert!(rig.manager.is_context_suspended(&lazy()));
}

// =============================================================================
// C. Unload and shutdown
// =============================================================================

#[test]
fn unload_during_suspend_destroys_immediately() {
    let mut rig = rig();
    rig.manager
        .register_view(&lazy(), ViewId(1), ViewKind::ExtensionPopup)
        .unwrap();
    rig.manager.unregister_view(ViewId(1)).unwrap();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);

    rig.manager.on_extension_unloaded(&lazy());
    assert!(!rig.manager.has_context(&lazy()));
    assert!(rig.manager.background_record(&lazy()).is_none());

    // Late ack and grace timer are no-ops.
    rig.manager.on_suspend_ack(&lazy(), seq);
    rig.advance(GRACE);
    assert_eq!(rig.host.destroyed(), 1);
    assert!(rig.observer.events().iter().any(|event| matches!(
        event,
        LifecycleEvent::ContextDestroyed {
            reason: DestroyReason::Unloaded,
            ..
        }
    )));
}

#[test]
fn unload_drops_views_and_workers() {
    let mut rig = sw_rig();
    rig.manager
        .increment_service_worker_keepalive(&worker(1), TimeoutPolicy::Default, ActivityType::Event, "e")
        .unwrap();
    rig.manager.on_extension_unloaded(&ExtensionId::new("sw"));
    assert!(!rig.manager.has_service_worker(&worker(1)));
    assert!(
        rig.manager
            .service_worker_keepalives_for_extension(&ExtensionId::new("sw"))
            .is_empty()
    );
    // Releasing after unload is tolerated.
    rig.manager
        .decrement_service_worker_keepalive(
            &worker(1),
            RequestToken::generate(),
            ActivityType::Event,
            "e",
        )
        .unwrap();
}

#[test]
fn shutdown_wins_over_handshake() {
    let mut rig = rig();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);
    rig.manager.shutdown();
    rig.manager.shutdown();

    assert!(!rig.manager.has_context(&lazy()));
    rig.manager.on_suspend_ack(&lazy(), seq);
    rig.advance(GRACE);
    assert_eq!(rig.host.destroyed(), 1);
    assert_eq!(
        rig.observer
            .names()
            .iter()
            .filter(|name| **name == "shutdown")
            .count(),
        1
    );
    assert_eq!(
        rig.manager.wake_context(&lazy()).unwrap_err(),
        LifecycleError::ShutDown
    );
}

// =============================================================================
// D. Views, network requests and devtools
// =============================================================================

#[test]
fn registering_a_view_twice_takes_one_claim() {
    let mut rig = rig();
    let m = &mut rig.manager;
    m.register_view(&lazy(), ViewId(3), ViewKind::TabContents).unwrap();
    m.register_view(&lazy(), ViewId(3), ViewKind::TabContents).unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(1));

    m.acquire_view_keepalive(ViewId(3)).unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(1));

    m.unregister_view(ViewId(3)).unwrap();
    m.unregister_view(ViewId(3)).unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(0));
}

#[test]
fn view_kind_change_releases_claim() {
    let mut rig = rig();
    let m = &mut rig.manager;
    m.register_view(&lazy(), ViewId(4), ViewKind::ExtensionGuest).unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(1));
    m.register_view(&lazy(), ViewId(4), ViewKind::OffscreenDocument).unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(0));
    assert!(!m.view_has_keepalive(ViewId(4)));
}

#[test]
fn background_document_never_holds_a_claim() {
    let mut rig = rig();
    rig.manager
        .register_view(&lazy(), ViewId(9), ViewKind::ExtensionBackgroundPage)
        .unwrap();
    assert_eq!(rig.manager.lazy_keepalive_count(&lazy()), Some(0));
    rig.advance(IDLE);
    assert_eq!(rig.remote.count("should_suspend"), 1);
}

#[test]
fn view_cannot_move_between_extensions() {
    let mut rig = rig();
    rig.manager
        .on_extension_loaded(ExtensionInfo::new("other", BackgroundKind::EventPage))
        .unwrap();
    rig.manager
        .register_view(&lazy(), ViewId(5), ViewKind::TabContents)
        .unwrap();
    let err = rig
        .manager
        .register_view(&ExtensionId::new("other"), ViewId(5), ViewKind::TabContents)
        .unwrap_err();
    assert!(matches!(err, LifecycleError::ViewExtensionMismatch { .. }));
}

#[test]
fn network_requests_from_background_document_hold_claims() {
    let mut rig = rig();
    let m = &mut rig.manager;
    m.register_view(&lazy(), ViewId(1), ViewKind::ExtensionBackgroundPage).unwrap();
    m.register_view(&lazy(), ViewId(2), ViewKind::ExtensionPopup).unwrap();

    m.network_request_started(ViewId(1), 100).unwrap();
    // Requests from other views do not count.
    m.network_request_started(ViewId(2), 101).unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(2));
    assert_eq!(
        m.network_request_started(ViewId(1), 100).unwrap_err(),
        LifecycleError::DuplicateNetworkRequest(100)
    );

    m.network_request_done(ViewId(1), 100).unwrap();
    m.network_request_done(ViewId(2), 101).unwrap();
    assert_eq!(m.lazy_keepalive_count(&lazy()), Some(1));
}

#[test]
fn request_done_after_context_replaced_is_ignored() {
    let mut rig = rig_with(LifecycleConfig {
        late_activity: LateActivityPolicy::Report,
        ..LifecycleConfig::default()
    });
    rig.manager
        .register_view(&lazy(), ViewId(1), ViewKind::ExtensionBackgroundPage)
        .unwrap();
    rig.manager.network_request_started(ViewId(1), 7).unwrap();
    rig.manager.on_background_context_gone(&lazy());

    // The orphaned claim was released with its context.
    assert_eq!(rig.manager.lazy_keepalive_count(&lazy()), Some(0));
    assert_eq!(rig.manager.pending_network_requests(), 0);
    rig.manager.wake_context(&lazy()).unwrap();
    rig.manager.network_request_done(ViewId(1), 7).unwrap();
    assert_eq!(rig.manager.lazy_keepalive_count(&lazy()), Some(0));
}

#[test]
fn devtools_attach_cancels_and_holds() {
    let mut rig = rig();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);

    rig.manager.devtools_attached(&lazy()).unwrap();
    assert_eq!(rig.remote.count("cancel_suspend"), 1);
    assert_eq!(rig.manager.lazy_keepalive_count(&lazy()), Some(1));
    rig.advance(IDLE * 2);
    assert!(rig.manager.has_context(&lazy()));

    rig.manager.devtools_detached(&lazy()).unwrap();
    rig.advance(IDLE);
    assert_eq!(rig.remote.count("should_suspend"), 2);
}

#[test]
fn teardown_closes_keepalive_views_first() {
    let mut rig = rig();
    rig.manager
        .register_view(&lazy(), ViewId(8), ViewKind::ExtensionPopup)
        .unwrap();
    rig.manager.release_view_keepalive(ViewId(8)).unwrap();
    rig.advance(IDLE);
    assert!(rig.ack_full_handshake(&lazy()));

    assert_eq!(rig.host.closed_views(), vec![ViewId(8)]);
    assert!(!rig.manager.is_view_registered(ViewId(8)));
    let calls = rig.host.calls();
    let close = calls
        .iter()
        .position(|call| matches!(call, HostCall::CloseView { .. }))
        .unwrap();
    let destroy = calls
        .iter()
        .position(|call| matches!(call, HostCall::Destroy { .. }))
        .unwrap();
    assert!(close < destroy);
    assert_eq!(rig.manager.lazy_keepalive_count(&lazy()), Some(0));
}

// =============================================================================
// E. Late activity and context loss
// =============================================================================

#[test]
fn recreate_policy_rebuilds_context_for_late_claims() {
    let mut rig = rig();
    rig.manager
        .increment_lazy_keepalive(&lazy(), ActivityType::Event, "e")
        .unwrap();
    rig.manager.on_background_context_gone(&lazy());

    assert!(rig.manager.has_context(&lazy()));
    assert_eq!(rig.host.created(), 2);
    assert_eq!(rig.manager.metrics().contexts_created, 2);
    assert_eq!(rig.manager.metrics().idle_time.count(), 1);
}

#[test]
fn report_policy_leaves_context_down() {
    let mut rig = rig_with(LifecycleConfig {
        late_activity: LateActivityPolicy::Report,
        ..LifecycleConfig::default()
    });
    rig.manager
        .increment_lazy_keepalive(&lazy(), ActivityType::Event, "e")
        .unwrap();
    rig.manager.on_background_context_gone(&lazy());

    assert!(!rig.manager.has_context(&lazy()));
    assert_eq!(rig.manager.metrics().late_activity, 1);
    assert!(rig.observer.events().contains(&LifecycleEvent::LateActivity {
        extension_id: lazy(),
        keepalive_count: 1,
    }));
    // Context-gone does not ask the host to destroy anything.
    assert_eq!(rig.host.destroyed(), 0);
}

#[test]
fn persistent_contexts_start_at_system_ready() {
    let mut rig = TestRig::new(LifecycleConfig::default());
    rig.manager
        .on_extension_loaded(ExtensionInfo::new("p1", BackgroundKind::Persistent))
        .unwrap();
    assert!(!rig.manager.has_context(&ExtensionId::new("p1")));

    rig.manager.on_system_ready();
    assert!(rig.manager.has_context(&ExtensionId::new("p1")));

    // Loaded after startup: created right away.
    rig.manager
        .on_extension_loaded(ExtensionInfo::new("p2", BackgroundKind::Persistent))
        .unwrap();
    assert!(rig.manager.has_context(&ExtensionId::new("p2")));
    assert_eq!(
        rig.manager.lazy_keepalive_count(&ExtensionId::new("p2")),
        None
    );
}

#[test]
fn deferred_startup_and_disallowed_contexts() {
    let mut rig = TestRig::new(LifecycleConfig {
        defer_startup_contexts: true,
        ..LifecycleConfig::default()
    });
    rig.manager
        .on_extension_loaded(ExtensionInfo::new("p", BackgroundKind::Persistent))
        .unwrap();
    rig.manager.on_system_ready();
    assert!(!rig.manager.has_context(&ExtensionId::new("p")));

    let mut rig = TestRig::new(LifecycleConfig {
        background_contexts_allowed: false,
        ..LifecycleConfig::default()
    });
    rig.manager
        .on_extension_loaded(ExtensionInfo::new("lazy", BackgroundKind::EventPage))
        .unwrap();
    assert_eq!(
        rig.manager.wake_context(&lazy()).unwrap_err(),
        LifecycleError::ContextNotAllowed(lazy())
    );
}

// =============================================================================
// F. Service workers
// =============================================================================

#[test]
fn service_worker_tokens_are_independent() {
    let mut rig = sw_rig();
    let w = worker(1);
    let a = rig
        .manager
        .increment_service_worker_keepalive(&w, TimeoutPolicy::Default, ActivityType::Event, "x")
        .unwrap();
    let b = rig
        .manager
        .increment_service_worker_keepalive(&w, TimeoutPolicy::DoesNotTimeout, ActivityType::Event, "x")
        .unwrap();
    assert_ne!(a, b);

    rig.manager
        .decrement_service_worker_keepalive(&w, b, ActivityType::Event, "x")
        .unwrap();
    let remaining = rig
        .manager
        .service_worker_keepalives_for_extension(&ExtensionId::new("sw"));
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].request_token, a);
    assert_eq!(rig.workers.finished(), vec![(1, b)]);
}

#[test]
fn mismatched_release_is_rejected_and_keeps_record() {
    let mut rig = sw_rig();
    let w = worker(1);
    let token = rig
        .manager
        .increment_service_worker_keepalive(&w, TimeoutPolicy::Default, ActivityType::Event, "x")
        .unwrap();
    let err = rig
        .manager
        .decrement_service_worker_keepalive(&w, token, ActivityType::ApiFunction, "x")
        .unwrap_err();
    assert!(matches!(err, LifecycleError::KeepaliveMismatch { .. }));
    rig.manager
        .decrement_service_worker_keepalive(&w, token, ActivityType::Event, "x")
        .unwrap();
}

#[test]
fn render_process_exit_drops_worker_keepalives_silently() {
    let mut rig = sw_rig();
    let w = worker(1);
    rig.manager
        .increment_service_worker_keepalive(&w, TimeoutPolicy::Default, ActivityType::Event, "x")
        .unwrap();
    rig.manager.on_render_process_exited(ProcessId(10));

    assert!(!rig.manager.has_service_worker(&w));
    assert!(
        rig.manager
            .service_worker_keepalives_for_extension(&ExtensionId::new("sw"))
            .is_empty()
    );
    assert!(rig.workers.finished().is_empty());
    assert!(rig.observer.names().contains(&"render_process_exited"));
}

#[test]
fn release_after_process_exit_is_tolerated() {
    let mut rig = sw_rig();
    let w = worker(1);
    let token = rig
        .manager
        .increment_service_worker_keepalive(&w, TimeoutPolicy::Default, ActivityType::Event, "x")
        .unwrap();
    rig.manager.on_render_process_exited(ProcessId(10));

    rig.manager
        .decrement_service_worker_keepalive(&w, token, ActivityType::Event, "x")
        .unwrap();
    assert_eq!(rig.manager.metrics().sw_release_after_process_exit, 1);
    assert!(rig.workers.finished().is_empty());

    // The marker is consumed; a repeated release is a caller bug again.
    let err = rig
        .manager
        .decrement_service_worker_keepalive(&w, token, ActivityType::Event, "x")
        .unwrap_err();
    assert_eq!(err, LifecycleError::UnknownKeepaliveToken(token));

    // Tokens that were never issued are still rejected.
    let err = rig
        .manager
        .decrement_service_worker_keepalive(&w, RequestToken::generate(), ActivityType::Event, "x")
        .unwrap_err();
    assert!(matches!(err, LifecycleError::UnknownKeepaliveToken(_)));
}

#[test]
fn process_exit_reaps_keepalives_of_unregistered_workers() {
    let mut rig = sw_rig();
    let w = worker(1);
    let token = rig
        .manager
        .increment_service_worker_keepalive(&w, TimeoutPolicy::Default, ActivityType::Event, "x")
        .unwrap();
    rig.manager.unregister_service_worker(&w);
    assert_eq!(
        rig.manager
            .service_worker_keepalives_for_extension(&ExtensionId::new("sw"))
            .len(),
        1
    );

    rig.manager.on_render_process_exited(ProcessId(10));
    assert!(
        rig.manager
            .service_worker_keepalives_for_extension(&ExtensionId::new("sw"))
            .is_empty()
    );
    rig.manager
        .decrement_service_worker_keepalive(&w, token, ActivityType::Event, "x")
        .unwrap();
    assert_eq!(rig.manager.metrics().sw_release_after_process_exit, 1);
}

#[test]
fn tolerated_finish_results_are_classified() {
    let mut rig = sw_rig();
    rig.workers.set_finish_result(ExternalRequestResult::WorkerNotRunning);
    let w = worker(1);
    let token = rig
        .manager
        .increment_service_worker_keepalive(&w, TimeoutPolicy::Default, ActivityType::Event, "x")
        .unwrap();
    rig.manager
        .decrement_service_worker_keepalive(&w, token, ActivityType::Event, "x")
        .unwrap();
    let snap = rig.manager.metrics_snapshot();
    assert_eq!(snap.sw_finish_after_ok_start.get("worker_not_running"), Some(&1));
}

#[test]
fn worker_context_id_is_stable_across_reregistration() {
    let mut rig = sw_rig();
    let first = rig.manager.context_id_for_worker(&worker(1)).unwrap();
    let again = rig.manager.register_service_worker(worker(1)).unwrap();
    assert_eq!(first, again);
    rig.manager.register_service_worker(worker(2)).unwrap();
    assert_eq!(
        rig.manager
            .service_workers_for_extension(&ExtensionId::new("sw"))
            .len(),
        2
    );
    let registered = rig
        .observer
        .names()
        .iter()
        .filter(|name| **name == "service_worker_registered")
        .count();
    assert_eq!(registered, 2);
}

#[test]
fn messages_carry_matching_sequence_ids() {
    let mut rig = rig();
    rig.advance(IDLE);
    let seq = rig.last_should_suspend_seq().unwrap();
    rig.manager.on_should_suspend_ack(&lazy(), seq);
    let messages = rig.remote.messages();
    assert_eq!(
        messages,
        vec![
            RemoteMessage::ShouldSuspend {
                extension_id: lazy(),
                sequence_id: seq
            },
            RemoteMessage::Suspend {
                extension_id: lazy(),
                sequence_id: seq
            },
        ]
    );
}
