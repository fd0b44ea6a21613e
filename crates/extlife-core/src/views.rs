//! Registry of front-end views hosting extension content.
//!
//! Each view belongs to exactly one extension and holds at most one
//! keepalive claim. The registry tracks ownership and the `has_keepalive`
//! flag; the manager turns flag changes into ledger increments and
//! decrements.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::LifecycleError;
use crate::types::{ExtensionId, ViewId, ViewKind};

/// What the registry knows about one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewRecord {
    pub extension_id: ExtensionId,
    pub kind: ViewKind,
    pub has_keepalive: bool,
}

impl ViewRecord {
    /// Whether the view could take a claim now.
    #[must_use]
    pub const fn can_keepalive(&self) -> bool {
        self.kind.can_hold_keepalive()
    }
}

/// Result of (re-)registering a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// The view was not registered before.
    pub is_new: bool,
    /// The view's kind changed so its existing claim must be released.
    pub must_release: bool,
}

#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: BTreeMap<ViewId, ViewRecord>,
}

impl ViewRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `view` as belonging to `extension` with `kind`.
    ///
    /// Re-registering updates the kind. A view may not move between
    /// extensions without being unregistered first.
    pub fn register(
        &mut self,
        extension: &ExtensionId,
        view: ViewId,
        kind: ViewKind,
    ) -> Result<Registration, LifecycleError> {
        match self.views.get_mut(&view) {
            Some(record) if &record.extension_id != extension => {
                Err(LifecycleError::ViewExtensionMismatch {
                    view,
                    registered: record.extension_id.clone(),
                    requested: extension.clone(),
                })
            }
            Some(record) => {
                record.kind = kind;
                Ok(Registration {
                    is_new: false,
                    must_release: record.has_keepalive && !kind.can_hold_keepalive(),
                })
            }
            None => {
                self.views.insert(
                    view,
                    ViewRecord {
                        extension_id: extension.clone(),
                        kind,
                        has_keepalive: false,
                    },
                );
                Ok(Registration {
                    is_new: true,
                    must_release: false,
                })
            }
        }
    }

    /// Mark `view` as holding a claim. Returns the owning extension when the
    /// caller must take a ledger claim, `None` when nothing changes.
    pub fn acquire(&mut self, view: ViewId) -> Option<ExtensionId> {
        let record = self.views.get_mut(&view)?;
        if !record.can_keepalive() || record.has_keepalive {
            return None;
        }
        record.has_keepalive = true;
        Some(record.extension_id.clone())
    }

    /// Clear the claim flag. Returns the owning extension when the caller
    /// must release a ledger claim.
    pub fn release(&mut self, view: ViewId) -> Option<ExtensionId> {
        let record = self.views.get_mut(&view)?;
        if !record.has_keepalive {
            return None;
        }
        record.has_keepalive = false;
        Some(record.extension_id.clone())
    }

    pub fn remove(&mut self, view: ViewId) -> Option<ViewRecord> {
        self.views.remove(&view)
    }

    /// Drop every view of `extension`, returning them in id order.
    pub fn remove_extension(&mut self, extension: &ExtensionId) -> Vec<(ViewId, ViewRecord)> {
        let ids: Vec<ViewId> = self
            .views
            .iter()
            .filter(|(_, record)| &record.extension_id == extension)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.views.remove(&id).map(|record| (id, record)))
            .collect()
    }

    #[must_use]
    pub fn get(&self, view: ViewId) -> Option<&ViewRecord> {
        self.views.get(&view)
    }

    #[must_use]
    pub fn contains(&self, view: ViewId) -> bool {
        self.views.contains_key(&view)
    }

    /// Views of `extension` in id order.
    #[must_use]
    pub fn for_extension(&self, extension: &ExtensionId) -> Vec<(ViewId, ViewKind)> {
        self.views
            .iter()
            .filter(|(_, record)| &record.extension_id == extension)
            .map(|(id, record)| (*id, record.kind))
            .collect()
    }

    /// Views of `extension` that could hold a claim; these are closed before
    /// the context is torn down.
    #[must_use]
    pub fn closable_for_extension(&self, extension: &ExtensionId) -> Vec<ViewId> {
        self.views
            .iter()
            .filter(|(_, record)| &record.extension_id == extension && record.can_keepalive())
            .map(|(id, _)| *id)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
