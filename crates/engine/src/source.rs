//! Entity-to-document mapping
//!
//! A [`DocumentSource`] is bound to one entity type and knows:
//! - which collection its documents live in
//! - how to derive a document id from key values
//! - how to build a document from a record, embedding owned entities
//! - how to apply a record's current values onto a fetched payload
//!
//! Owned entities are reached through the tracker: for every owned
//! navigation the live dependents of the record are embedded, objects for
//! single navigations and arrays for collection navigations.

use crate::cache::DocumentSourceCache;
use nestdoc_core::{
    Cardinality, ChangeRecord, ChangeTracker, Document, EntityType, OwnedNavigation, RecordId,
    Result, ID_FIELD,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Separator between the type name and key values in derived ids
const ID_SEPARATOR: char = '|';

/// Mapping between one entity type and its documents
#[derive(Debug)]
pub struct DocumentSource {
    entity_type: Arc<EntityType>,
}

impl DocumentSource {
    /// Create a document source for `entity_type`
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        DocumentSource { entity_type }
    }

    /// Entity type this source maps
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Collection the documents are stored in
    pub fn collection_id(&self) -> &str {
        self.entity_type.collection_id()
    }

    /// Derive the document id from a record's key values
    ///
    /// If a property is mapped to the `id` field its value is the id.
    /// Otherwise the id is the type name followed by each key value,
    /// separated by `|` (a literal `|` inside a value is escaped as `^|`).
    pub fn id(&self, record: &ChangeRecord) -> String {
        if let Some(id_property) = self.entity_type.id_property() {
            return key_component(record.value(&id_property.name));
        }

        let mut id = self.entity_type.name().to_string();
        for key in self.entity_type.key_properties() {
            id.push(ID_SEPARATOR);
            id.push_str(&escape_key(&key_component(record.value(&key.name))));
        }
        id
    }

    /// Build a fresh document from the record's current values
    ///
    /// Root documents get the `id` field; owned entities are embedded
    /// recursively. Reserved store fields other than the discriminator are
    /// left to the caller.
    pub fn create_document(
        &self,
        tracker: &ChangeTracker,
        record_id: RecordId,
        sources: &DocumentSourceCache,
    ) -> Result<Document> {
        let record = tracker.get(record_id)?;
        let mut document = Document::new();

        if self.entity_type.is_document_root() && self.entity_type.id_property().is_none() {
            document.insert(ID_FIELD.to_string(), Value::String(self.id(record)));
        }

        for property in self.entity_type.properties() {
            let value = record.value(&property.name).cloned().unwrap_or(Value::Null);
            document.insert(property.field.clone(), value);
        }

        if let Some(discriminator) = self.entity_type.discriminator() {
            document.insert(discriminator.field.clone(), discriminator.value.clone());
        }

        for navigation in self.entity_type.navigations() {
            let embedded = self.embed(navigation, None, tracker, record_id, sources)?;
            document.insert(navigation.field.clone(), embedded);
        }

        Ok(document)
    }

    /// Apply the record's current values onto an existing payload in place
    ///
    /// Returns `None` when no field actually changed, meaning there is
    /// nothing to write.
    pub fn update_document<'d>(
        &self,
        document: &'d mut Document,
        tracker: &ChangeTracker,
        record_id: RecordId,
        sources: &DocumentSourceCache,
    ) -> Result<Option<&'d Document>> {
        let record = tracker.get(record_id)?;
        let mut changed = false;

        for property in self.entity_type.properties() {
            let value = record.value(&property.name).cloned().unwrap_or(Value::Null);
            changed |= document.set_field(&property.field, value);
        }

        for navigation in self.entity_type.navigations() {
            let existing = document.get(&navigation.field).cloned();
            let embedded = self.embed(navigation, existing.as_ref(), tracker, record_id, sources)?;
            changed |= document.set_field(&navigation.field, embedded);
        }

        Ok(if changed { Some(&*document) } else { None })
    }

    /// JSON value for one owned navigation of `owner`
    ///
    /// When `existing` holds the currently stored value, matching embedded
    /// objects are updated rather than rebuilt so unmapped fields survive.
    fn embed(
        &self,
        navigation: &OwnedNavigation,
        existing: Option<&Value>,
        tracker: &ChangeTracker,
        owner: RecordId,
        sources: &DocumentSourceCache,
    ) -> Result<Value> {
        let dependents: Vec<RecordId> = tracker.dependents(owner, &navigation.target).collect();

        match navigation.cardinality {
            Cardinality::One => match dependents.first() {
                Some(&dependent) => {
                    let current = existing.and_then(Value::as_object);
                    nested_value(current, tracker, dependent, sources)
                }
                None => Ok(Value::Null),
            },
            Cardinality::Many => {
                let stored: &[Value] = existing
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let mut items = Vec::with_capacity(dependents.len());
                for (position, &dependent) in dependents.iter().enumerate() {
                    let record = tracker.get(dependent)?;
                    let current = find_embedded(stored, record, position);
                    items.push(nested_value(current, tracker, dependent, sources)?);
                }
                Ok(Value::Array(items))
            }
        }
    }
}

/// Build or update the embedded object for one owned record
fn nested_value(
    current: Option<&Map<String, Value>>,
    tracker: &ChangeTracker,
    dependent: RecordId,
    sources: &DocumentSourceCache,
) -> Result<Value> {
    let source = sources.get_or_create(tracker.get(dependent)?.entity_type());
    match current {
        Some(map) => {
            let mut nested = Document::from_map(map.clone());
            source.update_document(&mut nested, tracker, dependent, sources)?;
            Ok(nested.into_value())
        }
        None => Ok(source
            .create_document(tracker, dependent, sources)?
            .into_value()),
    }
}

/// Find the stored element embedding `record`
///
/// Elements are matched on the owned type's key fields; keyless owned
/// types fall back to matching by position.
fn find_embedded<'v>(
    stored: &'v [Value],
    record: &ChangeRecord,
    position: usize,
) -> Option<&'v Map<String, Value>> {
    let keys: Vec<(&str, Value)> = record
        .entity_type()
        .key_properties()
        .map(|key| {
            (
                key.field.as_str(),
                record.value(&key.name).cloned().unwrap_or(Value::Null),
            )
        })
        .collect();

    if keys.is_empty() {
        return stored.get(position).and_then(Value::as_object);
    }

    stored.iter().filter_map(Value::as_object).find(|element| {
        keys.iter()
            .all(|(field, value)| element.get(*field).unwrap_or(&Value::Null) == value)
    })
}

fn key_component(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn escape_key(component: &str) -> String {
    component.replace('^', "^^").replace(ID_SEPARATOR, "^|")
}
