//! Lifecycle counters and the idle-time histogram.
//!
//! Everything here is plain in-memory state owned by the manager; callers
//! read it through [`LifecycleManager::metrics`](crate::manager::LifecycleManager::metrics)
//! or a serialized [`MetricsSnapshot`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ExternalRequestResult;

// =============================================================================
// Histogram
// =============================================================================

/// Fixed-capacity histogram with exact quantiles over a FIFO window.
#[derive(Debug, Clone)]
pub struct Histogram {
    name: String,
    samples: Vec<f64>,
    max_samples: usize,
    total_count: u64,
    total_sum: f64,
    min: f64,
    max: f64,
}

impl Histogram {
    #[must_use]
    pub fn new(name: impl Into<String>, max_samples: usize) -> Self {
        Self {
            name: name.into(),
            samples: Vec::with_capacity(max_samples.min(1024)),
            max_samples: max_samples.max(1),
            total_count: 0,
            total_sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn record(&mut self, value: f64) {
        self.total_count += 1;
        self.total_sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Quantile (0.0–1.0) over the retained window.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        let idx = ((sorted.len() as f64 - 1.0) * q.clamp(0.0, 1.0)) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied()
    }

    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (self.total_count > 0).then(|| self.total_sum / self.total_count as f64)
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.total_count
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn summary(&self) -> HistogramSummary {
        let seen = self.total_count > 0;
        HistogramSummary {
            name: self.name.clone(),
            count: self.total_count,
            retained: self.samples.len() as u64,
            mean: self.mean(),
            min: seen.then_some(self.min),
            max: seen.then_some(self.max),
            p50: self.quantile(0.5),
            p95: self.quantile(0.95),
            p99: self.quantile(0.99),
        }
    }
}

/// Serializable histogram summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub name: String,
    pub count: u64,
    pub retained: u64,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

// =============================================================================
// Lifecycle metrics
// =============================================================================

const IDLE_TIME_SAMPLES: usize = 512;

/// Counters describing handshake traffic and context churn.
#[derive(Debug, Clone)]
pub struct LifecycleMetrics {
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub should_suspend_sent: u64,
    pub suspend_sent: u64,
    pub cancel_suspend_sent: u64,
    pub suspends_canceled: u64,
    pub stale_acks_dropped: u64,
    pub stale_timers_dropped: u64,
    pub remote_unavailable: u64,
    pub late_activity: u64,
    /// Releases of keepalives already reaped when their process exited.
    pub sw_release_after_process_exit: u64,
    /// Start results of service-worker external requests.
    pub sw_start_results: BTreeMap<ExternalRequestResult, u64>,
    /// Finish results for requests whose start succeeded.
    pub sw_finish_after_ok_start: BTreeMap<ExternalRequestResult, u64>,
    /// Finish results for requests whose start did not succeed.
    pub sw_finish_after_failed_start: BTreeMap<ExternalRequestResult, u64>,
    /// Milliseconds a lazy context stayed torn down before being recreated.
    pub idle_time: Histogram,
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self {
            contexts_created: 0,
            contexts_destroyed: 0,
            should_suspend_sent: 0,
            suspend_sent: 0,
            cancel_suspend_sent: 0,
            suspends_canceled: 0,
            stale_acks_dropped: 0,
            stale_timers_dropped: 0,
            remote_unavailable: 0,
            late_activity: 0,
            sw_release_after_process_exit: 0,
            sw_start_results: BTreeMap::new(),
            sw_finish_after_ok_start: BTreeMap::new(),
            sw_finish_after_failed_start: BTreeMap::new(),
            idle_time: Histogram::new("lazy_context_idle_ms", IDLE_TIME_SAMPLES),
        }
    }
}

impl LifecycleMetrics {
    pub fn record_sw_start(&mut self, result: ExternalRequestResult) {
        *self.sw_start_results.entry(result).or_insert(0) += 1;
    }

    pub fn record_sw_finish(&mut self, start: ExternalRequestResult, finish: ExternalRequestResult) {
        let bucket = if start == ExternalRequestResult::Ok {
            &mut self.sw_finish_after_ok_start
        } else {
            &mut self.sw_finish_after_failed_start
        };
        *bucket.entry(finish).or_insert(0) += 1;
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let named = |map: &BTreeMap<ExternalRequestResult, u64>| {
            map.iter()
                .map(|(result, count)| (result.as_str().to_string(), *count))
                .collect()
        };
        MetricsSnapshot {
            contexts_created: self.contexts_created,
            contexts_destroyed: self.contexts_destroyed,
            should_suspend_sent: self.should_suspend_sent,
            suspend_sent: self.suspend_sent,
            cancel_suspend_sent: self.cancel_suspend_sent,
            suspends_canceled: self.suspends_canceled,
            stale_acks_dropped: self.stale_acks_dropped,
            stale_timers_dropped: self.stale_timers_dropped,
            remote_unavailable: self.remote_unavailable,
            late_activity: self.late_activity,
            sw_release_after_process_exit: self.sw_release_after_process_exit,
            sw_start_results: named(&self.sw_start_results),
            sw_finish_after_ok_start: named(&self.sw_finish_after_ok_start),
            sw_finish_after_failed_start: named(&self.sw_finish_after_failed_start),
            idle_time: self.idle_time.summary(),
        }
    }
}

/// Point-in-time copy of [`LifecycleMetrics`], keyed by result name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub should_suspend_sent: u64,
    pub suspend_sent: u64,
    pub cancel_suspend_sent: u64,
    pub suspends_canceled: u64,
    pub stale_acks_dropped: u64,
    pub stale_timers_dropped: u64,
    pub remote_unavailable: u64,
    pub late_activity: u64,
    #[serde(default)]
    pub sw_release_after_process_exit: u64,
    pub sw_start_results: BTreeMap<String, u64>,
    pub sw_finish_after_ok_start: BTreeMap<String, u64>,
    pub sw_finish_after_failed_start: BTreeMap<String, u64>,
    pub idle_time: HistogramSummary,
}
