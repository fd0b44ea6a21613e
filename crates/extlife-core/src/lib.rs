//! extlife-core: lifecycle manager for extension background contexts
//!
//! Decides when an extension's background context is created, kept alive,
//! suspended and torn down, while keepalive claims arrive and leave from
//! views, network requests, devtools, event dispatch and service workers.
//!
//! # Architecture
//!
//! ```text
//! views / network / devtools / events ──► KeepaliveLedger ──► SequenceGuard
//!                                                │                 │
//!                                   count hits 0 ▼                 ▼
//!                          TaskScheduler ◄── idle check ── close_sequence_id
//!                                │
//!                                ▼
//!     RemoteRuntime ◄── ShouldSuspend → Suspend (→ CancelSuspend) ── acks
//!                                │
//!                                ▼
//!                   ContextHost::destroy_context
//! ```
//!
//! # Modules
//!
//! - `types`: identifiers, background kinds, activities, view kinds
//! - `ledger`: per-extension keepalive count and activity multiset
//! - `sequence`: close sequence ids that invalidate stale timers and acks
//! - `suspend`: handshake phases, remote messages and staleness checks
//! - `views`: view registry and per-view keepalive claims
//! - `service_worker`: worker registry and external-request keepalives
//! - `host`: outbound collaborator traits
//! - `scheduler`: delayed tasks and the manual virtual clock
//! - `observer`: lifecycle event fan-out
//! - `manager`: the orchestrator
//! - `runtime`: tokio driver serializing every entry point on one task
//! - `harness`: recording collaborators and the deterministic test rig
//! - `scenario`: TOML scenario replay
//! - `telemetry`: counters and the idle-time histogram
//! - `config` / `logging` / `error`: ambient plumbing
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod harness;
pub mod host;
pub mod ledger;
pub mod logging;
pub mod manager;
pub mod observer;
pub mod runtime;
pub mod scenario;
pub mod scheduler;
pub mod sequence;
pub mod service_worker;
pub mod suspend;
pub mod telemetry;
pub mod types;
pub mod views;

pub use config::{Config, LateActivityPolicy, LifecycleConfig};
pub use error::{Error, LifecycleError, Result};
pub use manager::{Collaborators, LifecycleManager};
pub use runtime::{LifecycleHandle, spawn_lifecycle_service};
pub use types::{ActivityType, BackgroundKind, ExtensionId, ExtensionInfo, ViewId, ViewKind, WorkerId};

/// Version of the extlife-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
