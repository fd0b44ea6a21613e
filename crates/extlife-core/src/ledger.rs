//! Keepalive ledger: per-extension claim counts plus a labeled multiset of
//! the activities holding them.
//!
//! The ledger only does bookkeeping. It reports count transitions
//! ([`LedgerTransition`]) and leaves it to the manager to react (invalidate
//! the close sequence on `BecameActive`, schedule an idle check on
//! `BecameIdle`).

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::suspend::SuspendPhase;
use crate::types::{Activity, ExtensionId};

// =============================================================================
// Activity multiset
// =============================================================================

/// Multiset of keepalive claims. The same activity may be held many times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityMultiset {
    entries: BTreeMap<Activity, usize>,
    len: usize,
}

impl ActivityMultiset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, activity: Activity) {
        *self.entries.entry(activity).or_insert(0) += 1;
        self.len += 1;
    }

    /// Remove one occurrence; returns whether one was found.
    pub fn remove_one(&mut self, activity: &Activity) -> bool {
        let Some(count) = self.entries.get_mut(activity) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.entries.remove(activity);
        }
        self.len -= 1;
        true
    }

    /// Number of times `activity` is held.
    #[must_use]
    pub fn count(&self, activity: &Activity) -> usize {
        self.entries.get(activity).copied().unwrap_or(0)
    }

    /// Total number of held claims, counting duplicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }

    /// Distinct activities with their multiplicity, in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&Activity, usize)> {
        self.entries.iter().map(|(activity, count)| (activity, *count))
    }

    /// Flattened snapshot, one entry per held claim.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Activity> {
        self.entries
            .iter()
            .flat_map(|(activity, count)| std::iter::repeat_n(activity.clone(), *count))
            .collect()
    }
}

impl Serialize for ActivityMultiset {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_vec().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActivityMultiset {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let activities = Vec::<Activity>::deserialize(deserializer)?;
        Ok(activities.into_iter().collect())
    }
}

impl FromIterator<Activity> for ActivityMultiset {
    fn from_iter<I: IntoIterator<Item = Activity>>(iter: I) -> Self {
        let mut set = Self::new();
        for activity in iter {
            set.insert(activity);
        }
        set
    }
}

// =============================================================================
// Background context record
// =============================================================================

/// Per-extension keepalive and suspend bookkeeping for a lazy context.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackgroundContextRecord {
    /// Sum of all outstanding claims.
    pub keepalive_count: usize,
    /// Every individual claim.
    pub activities: ActivityMultiset,
    /// True while the Suspend directive is in flight.
    pub is_closing: bool,
    /// Sequence id of the most recent idle period.
    pub close_sequence_id: u64,
    /// Where the suspend handshake currently stands.
    pub phase: SuspendPhase,
    /// Scheduler time at which the context was last torn down.
    pub since_suspended: Option<Duration>,
}

/// Count transition caused by a ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTransition {
    /// The count went from 0 to 1.
    BecameActive,
    /// The count went from 1 to 0.
    BecameIdle,
    /// The count changed without crossing zero.
    Unchanged,
}

// =============================================================================
// Ledger
// =============================================================================

/// Keepalive ledger for every extension with a lazy background context.
#[derive(Debug, Default)]
pub struct KeepaliveLedger {
    records: HashMap<ExtensionId, BackgroundContextRecord>,
}

impl KeepaliveLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one claim, creating the record if needed.
    pub fn increment(&mut self, extension: &ExtensionId, activity: Activity) -> LedgerTransition {
        let record = self.records.entry(extension.clone()).or_default();
        record.keepalive_count += 1;
        record.activities.insert(activity);
        if record.keepalive_count == 1 {
            LedgerTransition::BecameActive
        } else {
            LedgerTransition::Unchanged
        }
    }

    /// Release one claim.
    ///
    /// The detail string is diagnostic only: a release with no exactly
    /// matching activity still decrements the count.
    pub fn decrement(
        &mut self,
        extension: &ExtensionId,
        activity: &Activity,
    ) -> Result<LedgerTransition, LifecycleError> {
        let record = self
            .records
            .get_mut(extension)
            .ok_or_else(|| LifecycleError::NoRecord(extension.clone()))?;
        if record.keepalive_count == 0 {
            return Err(LifecycleError::UnbalancedDecrement {
                extension: extension.clone(),
                activity_type: activity.activity_type,
            });
        }

        record.keepalive_count -= 1;
        if !record.activities.remove_one(activity) {
            tracing::trace!(
                extension_id = %extension,
                activity = %activity,
                "released keepalive had no matching activity"
            );
        }

        if record.keepalive_count == 0 {
            record.activities.clear();
            Ok(LedgerTransition::BecameIdle)
        } else {
            Ok(LedgerTransition::Unchanged)
        }
    }

    #[must_use]
    pub fn count(&self, extension: &ExtensionId) -> usize {
        self.records
            .get(extension)
            .map_or(0, |record| record.keepalive_count)
    }

    #[must_use]
    pub fn activities(&self, extension: &ExtensionId) -> ActivityMultiset {
        self.records
            .get(extension)
            .map(|record| record.activities.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn record(&self, extension: &ExtensionId) -> Option<&BackgroundContextRecord> {
        self.records.get(extension)
    }

    pub fn record_mut(&mut self, extension: &ExtensionId) -> Option<&mut BackgroundContextRecord> {
        self.records.get_mut(extension)
    }

    /// Record for `extension`, created empty if absent.
    pub fn ensure(&mut self, extension: &ExtensionId) -> &mut BackgroundContextRecord {
        self.records.entry(extension.clone()).or_default()
    }

    pub fn remove(&mut self, extension: &ExtensionId) -> Option<BackgroundContextRecord> {
        self.records.remove(extension)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActivityType;

    fn ext() -> ExtensionId {
        ExtensionId::new("abc")
    }

    fn net(id: u64) -> Activity {
        Activity::new(ActivityType::Network, id.to_string())
    }

    #[test]
    fn multiset_keeps_duplicates() {
        let mut set = ActivityMultiset::new();
        set.insert(net(1));
        set.insert(net(1));
        set.insert(net(2));
        assert_eq!(set.len(), 3);
        assert_eq!(set.count(&net(1)), 2);

        assert!(set.remove_one(&net(1)));
        assert_eq!(set.count(&net(1)), 1);
        assert!(set.remove_one(&net(1)));
        assert!(!set.remove_one(&net(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn multiset_serializes_as_flat_list() {
        let set: ActivityMultiset = vec![net(1), net(1)].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        let back: ActivityMultiset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.to_vec().len(), 2);
    }

    #[test]
    fn increment_reports_zero_to_one() {
        let mut ledger = KeepaliveLedger::new();
        assert_eq!(ledger.increment(&ext(), net(1)), LedgerTransition::BecameActive);
        assert_eq!(ledger.increment(&ext(), net(2)), LedgerTransition::Unchanged);
        assert_eq!(ledger.count(&ext()), 2);
    }

    #[test]
    fn decrement_reports_one_to_zero_and_clears_leftovers() {
        let mut ledger = KeepaliveLedger::new();
        ledger.increment(&ext(), net(1));
        ledger.increment(&ext(), net(2));

        // Mismatched detail still decrements.
        assert_eq!(
            ledger.decrement(&ext(), &net(99)).unwrap(),
            LedgerTransition::Unchanged
        );
        assert_eq!(ledger.count(&ext()), 1);
        assert_eq!(ledger.activities(&ext()).len(), 2);

        assert_eq!(
            ledger.decrement(&ext(), &net(1)).unwrap(),
            LedgerTransition::BecameIdle
        );
        assert!(ledger.activities(&ext()).is_empty());
    }

    #[test]
    fn decrement_below_zero_is_rejected() {
        let mut ledger = KeepaliveLedger::new();
        ledger.increment(&ext(), net(1));
        ledger.decrement(&ext(), &net(1)).unwrap();
        let err = ledger.decrement(&ext(), &net(1)).unwrap_err();
        assert!(matches!(err, LifecycleError::UnbalancedDecrement { .. }));
        assert_eq!(ledger.count(&ext()), 0);
    }

    #[test]
    fn decrement_without_record_is_rejected() {
        let mut ledger = KeepaliveLedger::new();
        let err = ledger.decrement(&ext(), &net(1)).unwrap_err();
        assert_eq!(err, LifecycleError::NoRecord(ext()));
    }

    #[test]
    fn remove_drops_the_record() {
        let mut ledger = KeepaliveLedger::new();
        ledger.increment(&ext(), net(1));
        assert_eq!(ledger.len(), 1);
        let record = ledger.remove(&ext()).unwrap();
        assert_eq!(record.keepalive_count, 1);
        assert!(ledger.is_empty());
        assert_eq!(ledger.count(&ext()), 0);
    }
}
