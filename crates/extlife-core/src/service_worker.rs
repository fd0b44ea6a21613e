//! Service-worker registry and external-request keepalives.
//!
//! Worker-backed extensions do not use the lazy ledger. Each keepalive is an
//! external request on the worker runtime, paired with a [`RequestToken`];
//! the release must present the same token, worker, activity type and
//! detail.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::types::{
    ActivityType, ExtensionId, ExternalRequestResult, ProcessId, RequestToken, TimeoutPolicy,
    WorkerId,
};

/// One outstanding service-worker keepalive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceWorkerKeepaliveRecord {
    pub worker: WorkerId,
    pub request_token: RequestToken,
    pub activity_type: ActivityType,
    pub detail: String,
    pub timeout_policy: TimeoutPolicy,
    /// What the worker runtime reported when the request started.
    pub start_result: ExternalRequestResult,
}

/// Running workers plus their outstanding keepalives.
#[derive(Debug, Default)]
pub struct WorkerTracker {
    workers: BTreeMap<WorkerId, Uuid>,
    keepalives: HashMap<RequestToken, ServiceWorkerKeepaliveRecord>,
    /// Tokens force-removed when their render process exited and not yet
    /// released by their holder.
    reaped: HashSet<RequestToken>,
}

impl WorkerTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running worker. Returns its context id and whether it is
    /// newly registered; re-registration keeps the existing id.
    pub fn register(&mut self, worker: WorkerId) -> (Uuid, bool) {
        if let Some(context_id) = self.workers.get(&worker) {
            return (*context_id, false);
        }
        let context_id = Uuid::new_v4();
        self.workers.insert(worker, context_id);
        (context_id, true)
    }

    pub fn unregister(&mut self, worker: &WorkerId) -> Option<Uuid> {
        self.workers.remove(worker)
    }

    #[must_use]
    pub fn has_worker(&self, worker: &WorkerId) -> bool {
        self.workers.contains_key(worker)
    }

    #[must_use]
    pub fn context_id(&self, worker: &WorkerId) -> Option<Uuid> {
        self.workers.get(worker).copied()
    }

    #[must_use]
    pub fn workers_for_extension(&self, extension: &ExtensionId) -> Vec<WorkerId> {
        self.workers
            .keys()
            .filter(|worker| &worker.extension_id == extension)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn workers_in_process(&self, process: ProcessId) -> Vec<WorkerId> {
        self.workers
            .keys()
            .filter(|worker| worker.render_process_id == process)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn has_any_for_extension(&self, extension: &ExtensionId) -> bool {
        self.workers.keys().any(|worker| &worker.extension_id == extension)
    }

    pub fn insert_keepalive(&mut self, record: ServiceWorkerKeepaliveRecord) {
        self.keepalives.insert(record.request_token, record);
    }

    /// Remove the keepalive for `token` after checking that the release
    /// matches the acquisition. A mismatch leaves the record in place.
    pub fn take_keepalive(
        &mut self,
        worker: &WorkerId,
        token: RequestToken,
        activity_type: ActivityType,
        detail: &str,
    ) -> Result<ServiceWorkerKeepaliveRecord, LifecycleError> {
        let record = self
            .keepalives
            .get(&token)
            .ok_or(LifecycleError::UnknownKeepaliveToken(token))?;

        let mismatch = |field: &'static str, held: String, released: String| {
            LifecycleError::KeepaliveMismatch {
                token,
                field,
                held,
                released,
            }
        };
        if &record.worker != worker {
            return Err(mismatch("worker", record.worker.to_string(), worker.to_string()));
        }
        if record.activity_type != activity_type {
            return Err(mismatch(
                "activity_type",
                record.activity_type.to_string(),
                activity_type.to_string(),
            ));
        }
        if record.detail != detail {
            return Err(mismatch("detail", record.detail.clone(), detail.to_string()));
        }

        self.keepalives
            .remove(&token)
            .ok_or(LifecycleError::UnknownKeepaliveToken(token))
    }

    /// Drop every keepalive held in `process`, registered worker or not.
    /// The tokens are remembered so their late release can be recognized.
    pub fn reap_process(&mut self, process: ProcessId) -> Vec<ServiceWorkerKeepaliveRecord> {
        let reaped = self.drain_keepalives(|record| record.worker.render_process_id == process);
        self.reaped
            .extend(reaped.iter().map(|record| record.request_token));
        reaped
    }

    /// Consume the reaped marker for `token`. Returns whether the token was
    /// reaped by a process exit.
    pub fn take_reaped(&mut self, token: RequestToken) -> bool {
        self.reaped.remove(&token)
    }

    #[must_use]
    pub fn reaped_count(&self) -> usize {
        self.reaped.len()
    }

    /// Drop every keepalive held by workers of `extension`.
    pub fn drop_keepalives_for_extension(
        &mut self,
        extension: &ExtensionId,
    ) -> Vec<ServiceWorkerKeepaliveRecord> {
        self.drain_keepalives(|record| &record.worker.extension_id == extension)
    }

    fn drain_keepalives(
        &mut self,
        mut matches: impl FnMut(&ServiceWorkerKeepaliveRecord) -> bool,
    ) -> Vec<ServiceWorkerKeepaliveRecord> {
        let tokens: Vec<RequestToken> = self
            .keepalives
            .values()
            .filter(|record| matches(record))
            .map(|record| record.request_token)
            .collect();
        tokens
            .into_iter()
            .filter_map(|token| self.keepalives.remove(&token))
            .collect()
    }

    /// Outstanding keepalives for `extension`, sorted by token.
    #[must_use]
    pub fn keepalives_for_extension(
        &self,
        extension: &ExtensionId,
    ) -> Vec<ServiceWorkerKeepaliveRecord> {
        let mut records: Vec<_> = self
            .keepalives
            .values()
            .filter(|record| &record.worker.extension_id == extension)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.request_token);
        records
    }

    #[must_use]
    pub fn keepalive(&self, token: RequestToken) -> Option<&ServiceWorkerKeepaliveRecord> {
        self.keepalives.get(&token)
    }

    #[must_use]
    pub fn keepalive_count(&self) -> usize {
        self.keepalives.len()
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn clear(&mut self) {
        self.workers.clear();
        self.keepalives.clear();
        self.reaped.clear();
    }
}
