//! Entity lifecycle states
//!
//! State transitions driven by the change tracker:
//! - `Unchanged` → `Modified` (property write, or promotion of a document
//!   root whose owned entities changed)
//! - any → `Deleted`
//!
//! Only `Added`, `Modified` and `Deleted` map to a document operation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// New entity, not yet in the store
    Added,
    /// Existing entity with pending changes
    Modified,
    /// Existing entity scheduled for removal
    Deleted,
    /// Existing entity without changes
    Unchanged,
    /// Tracked but excluded from saving
    Unmodified,
}

impl EntityState {
    /// Whether a record in this state is selected for saving
    pub fn has_pending_write(self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }

    /// Stable lowercase name, used in log fields
    pub fn as_str(self) -> &'static str {
        match self {
            EntityState::Added => "added",
            EntityState::Modified => "modified",
            EntityState::Deleted => "deleted",
            EntityState::Unchanged => "unchanged",
            EntityState::Unmodified => "unmodified",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
