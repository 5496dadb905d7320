//! Document root resolution
//!
//! Owned records have no store identity of their own; they are written as
//! part of the document of the root at the top of their ownership chain.
//! The walk is iterative with a visited set, so malformed owner links fail
//! with [`Error::OwnershipCycle`] instead of looping.

use nestdoc_core::{ChangeRecord, ChangeTracker, Error, RecordId, Result};
use rustc_hash::FxHashSet;

/// Finds the document root that owns a record
#[derive(Debug, Clone, Copy, Default)]
pub struct RootResolver {
    sensitive_data_logging: bool,
}

impl RootResolver {
    /// Create a resolver
    ///
    /// With `sensitive_data_logging`, orphan errors carry the key values of
    /// the orphaned record.
    pub fn new(sensitive_data_logging: bool) -> Self {
        RootResolver {
            sensitive_data_logging,
        }
    }

    /// Return the document-root record owning `record_id`
    ///
    /// A record of a document-root type resolves to itself.
    ///
    /// # Errors
    ///
    /// - [`Error::OrphanedNestedDocument`] if an owner along the chain is
    ///   not tracked
    /// - [`Error::OwnershipCycle`] if the chain revisits a record
    /// - [`Error::UnknownRecord`] if `record_id` is not tracked
    pub fn resolve_root(&self, tracker: &ChangeTracker, record_id: RecordId) -> Result<RecordId> {
        let mut visited = FxHashSet::default();
        let mut current = record_id;

        loop {
            let record = tracker.get(current)?;
            let ownership = match record.entity_type().ownership() {
                Some(ownership) => ownership,
                None => return Ok(current),
            };

            if !visited.insert(current) {
                return Err(Error::OwnershipCycle {
                    entity_type: record.entity_type().display_name().to_string(),
                });
            }

            match record.owner() {
                Some(owner) if tracker.get(owner).is_ok() => current = owner,
                _ => return Err(self.orphaned(record, &ownership.principal)),
            }
        }
    }

    fn orphaned(&self, record: &ChangeRecord, owner_type: &str) -> Error {
        Error::OrphanedNestedDocument {
            entity_type: record.entity_type().display_name().to_string(),
            owner_type: owner_type.to_string(),
            key_values: self
                .sensitive_data_logging
                .then(|| record.key_values_string()),
        }
    }
}
