//! Change tracking
//!
//! The [`ChangeTracker`] owns every tracked [`ChangeRecord`] and hands out
//! copyable [`RecordId`] handles. Records reference each other by handle:
//! - owned records point at the record that owns them
//! - shared-identity records point at the counterpart mapped to the same
//!   physical document
//!
//! The save pipeline only reads records, except for promoting a document
//! root from `Unchanged` to `Modified` and storing back updated payloads.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::model::EntityType;
use crate::state::EntityState;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Handle to a record inside a [`ChangeTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(usize);

impl RecordId {
    /// Create a handle from a raw arena index
    pub fn from_index(index: usize) -> Self {
        RecordId(index)
    }

    /// Raw arena index
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One tracked entity instance
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    entity_type: Arc<EntityType>,
    state: EntityState,
    values: BTreeMap<String, Value>,
    modified: FxHashSet<String>,
    owner: Option<RecordId>,
    shared_identity: Option<RecordId>,
    document: Option<Document>,
}

impl ChangeRecord {
    /// Entity type of this record
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Current lifecycle state
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Current value of a property (`None` if never set)
    pub fn value(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    /// All current property values
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Whether a property was written since the record was last accepted
    pub fn is_property_modified(&self, property: &str) -> bool {
        self.modified.contains(property)
    }

    /// Record that owns this one (owned types only)
    pub fn owner(&self) -> Option<RecordId> {
        self.owner
    }

    /// Record mapped to the same physical document, if any
    pub fn shared_identity(&self) -> Option<RecordId> {
        self.shared_identity
    }

    /// Previously fetched document payload, if any
    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    /// Key values formatted for diagnostics, e.g. `{CustomerId: 7}`
    ///
    /// This exposes entity data and must only be surfaced when sensitive
    /// data logging is enabled.
    pub fn key_values_string(&self) -> String {
        let parts: Vec<String> = self
            .entity_type
            .key_properties()
            .map(|key| {
                let rendered = match self.values.get(&key.name) {
                    Some(Value::String(s)) => format!("'{}'", s),
                    Some(other) => other.to_string(),
                    None => "<null>".to_string(),
                };
                format!("{}: {}", key.name, rendered)
            })
            .collect();
        format!("{{{}}}", parts.join(", "))
    }
}

/// Arena of tracked records
#[derive(Debug, Default)]
pub struct ChangeTracker {
    records: Vec<ChangeRecord>,
}

impl ChangeTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a record without an owner
    ///
    /// Document roots are tracked this way. Tracking an owned type here
    /// leaves it orphaned, which the save pipeline rejects.
    pub fn track<I, K>(
        &mut self,
        entity_type: &Arc<EntityType>,
        values: I,
        state: EntityState,
    ) -> Result<RecordId>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values = collect_values(entity_type, values)?;
        Ok(self.push(ChangeRecord {
            entity_type: Arc::clone(entity_type),
            state,
            values,
            modified: FxHashSet::default(),
            owner: None,
            shared_identity: None,
            document: None,
        }))
    }

    /// Track a record owned by `owner`
    ///
    /// # Errors
    ///
    /// Fails if `entity_type` is a document root, if `owner` is unknown, or
    /// if the owner's type is not the principal of the ownership edge.
    pub fn track_owned<I, K>(
        &mut self,
        entity_type: &Arc<EntityType>,
        values: I,
        owner: RecordId,
        state: EntityState,
    ) -> Result<RecordId>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let ownership = entity_type.ownership().ok_or_else(|| {
            Error::invalid_model(format!(
                "document root '{}' cannot have an owner",
                entity_type.name()
            ))
        })?;
        let owner_type = self.get(owner)?.entity_type();
        if owner_type.name() != ownership.principal {
            return Err(Error::InvalidOwner {
                entity_type: entity_type.name().to_string(),
                expected: ownership.principal.clone(),
                actual: owner_type.name().to_string(),
            });
        }

        let id = self.track(entity_type, values, state)?;
        self.records[id.0].owner = Some(owner);
        Ok(id)
    }

    fn push(&mut self, record: ChangeRecord) -> RecordId {
        self.records.push(record);
        RecordId(self.records.len() - 1)
    }

    /// Get a record
    pub fn get(&self, id: RecordId) -> Result<&ChangeRecord> {
        self.records.get(id.0).ok_or(Error::UnknownRecord(id))
    }

    fn get_mut(&mut self, id: RecordId) -> Result<&mut ChangeRecord> {
        self.records.get_mut(id.0).ok_or(Error::UnknownRecord(id))
    }

    /// Current state of a record
    pub fn state(&self, id: RecordId) -> Result<EntityState> {
        Ok(self.get(id)?.state)
    }

    /// Overwrite the state of a record
    pub fn set_state(&mut self, id: RecordId, state: EntityState) -> Result<()> {
        self.get_mut(id)?.state = state;
        Ok(())
    }

    /// Write a property value
    ///
    /// Returns whether the value changed. A change marks the property as
    /// modified and moves an `Unchanged` record to `Modified`.
    pub fn set_value(&mut self, id: RecordId, property: &str, value: Value) -> Result<bool> {
        let record = self.get_mut(id)?;
        if record.entity_type.find_property(property).is_none() {
            return Err(Error::invalid_model(format!(
                "'{}' has no property '{}'",
                record.entity_type.name(),
                property
            )));
        }
        if record.values.get(property) == Some(&value) {
            return Ok(false);
        }
        record.values.insert(property.to_string(), value);
        record.modified.insert(property.to_string());
        if record.state == EntityState::Unchanged {
            record.state = EntityState::Modified;
        }
        Ok(true)
    }

    /// Link two records that map to the same physical document
    pub fn set_shared_identity(&mut self, a: RecordId, b: RecordId) -> Result<()> {
        self.get(b)?;
        self.get_mut(a)?.shared_identity = Some(b);
        self.get_mut(b)?.shared_identity = Some(a);
        Ok(())
    }

    /// Attach a previously fetched document payload
    pub fn attach_document(&mut self, id: RecordId, document: Document) -> Result<()> {
        self.get_mut(id)?.document = Some(document);
        Ok(())
    }

    /// Detach and return the document payload
    pub fn take_document(&mut self, id: RecordId) -> Result<Option<Document>> {
        Ok(self.get_mut(id)?.document.take())
    }

    /// Records with a pending write, in tracking order
    pub fn entries_to_save(&self) -> Vec<RecordId> {
        self.iter()
            .filter(|(_, record)| record.state.has_pending_write())
            .map(|(id, _)| id)
            .collect()
    }

    /// Live records of type `target` owned by `owner`, in tracking order
    ///
    /// Deleted and unmodified records are not part of the owner's document.
    pub fn dependents<'a>(
        &'a self,
        owner: RecordId,
        target: &'a str,
    ) -> impl Iterator<Item = RecordId> + 'a {
        self.iter()
            .filter(move |(_, record)| {
                record.owner == Some(owner)
                    && record.entity_type.name() == target
                    && matches!(
                        record.state,
                        EntityState::Added | EntityState::Modified | EntityState::Unchanged
                    )
            })
            .map(|(id, _)| id)
    }

    /// Mark all saved changes as accepted
    ///
    /// Added and modified records become `Unchanged`, deleted records become
    /// `Unmodified` and their payloads are dropped.
    pub fn accept_all_changes(&mut self) {
        for record in &mut self.records {
            match record.state {
                EntityState::Added | EntityState::Modified => {
                    record.state = EntityState::Unchanged;
                    record.modified.clear();
                }
                EntityState::Deleted => {
                    record.state = EntityState::Unmodified;
                    record.modified.clear();
                    record.document = None;
                }
                EntityState::Unchanged | EntityState::Unmodified => {}
            }
        }
    }

    /// Iterate records in tracking order
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &ChangeRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (RecordId(index), record))
    }

    /// Number of tracked records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn collect_values<I, K>(entity_type: &EntityType, values: I) -> Result<BTreeMap<String, Value>>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let mut collected = BTreeMap::new();
    for (name, value) in values {
        let name = name.into();
        if entity_type.find_property(&name).is_none() {
            return Err(Error::invalid_model(format!(
                "'{}' has no property '{}'",
                entity_type.name(),
                name
            )));
        }
        collected.insert(name, value);
    }
    Ok(collected)
}
