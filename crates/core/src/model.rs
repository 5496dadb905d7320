//! Entity metadata
//!
//! The model describes how tracked entities map onto documents:
//! - EntityType: property-to-field mappings, owned navigations, ownership
//! - Model: immutable, validated registry of entity types
//!
//! An entity type without an ownership edge is a *document root*: each of
//! its instances is stored as one top-level document. Owned types are
//! embedded inside their principal's document under a navigation field.
//!
//! ## Usage
//!
//! ```
//! use nestdoc_core::model::{EntityTypeBuilder, Model};
//!
//! let model = Model::builder()
//!     .entity(
//!         EntityTypeBuilder::root("Customer")
//!             .collection("Customers")
//!             .key("CustomerId")
//!             .property("Name")
//!             .owns_one("ShippingAddress", "Address"),
//!     )
//!     .entity(
//!         EntityTypeBuilder::owned("Address", "Customer")
//!             .key("CustomerId")
//!             .property("City"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert!(model.entity_type("Customer").unwrap().is_document_root());
//! assert!(!model.entity_type("Address").unwrap().is_document_root());
//! ```

use crate::document::{ID_FIELD, PARTITION_KEY_FIELD};
use crate::error::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::sync::Arc;

/// Mapping of one scalar property to a document field
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMapping {
    /// Property name on the entity
    pub name: String,
    /// Field name in the document
    pub field: String,
    /// Whether the property is part of the primary key
    pub is_key: bool,
}

/// Whether an owned navigation embeds one entity or many
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Embedded as a JSON object, or `null` when absent
    One,
    /// Embedded as a JSON array
    Many,
}

/// Navigation from a principal to the entities it owns
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedNavigation {
    /// Field name in the principal's document
    pub field: String,
    /// Name of the owned entity type
    pub target: String,
    /// Embedding shape
    pub cardinality: Cardinality,
}

/// Ownership edge from an owned type to its principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    /// Name of the principal (owner) entity type
    pub principal: String,
}

/// Discriminator stamped on documents of types in an inheritance hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct Discriminator {
    /// Document field holding the discriminator
    pub field: String,
    /// Value identifying this concrete type
    pub value: Value,
}

/// Metadata for one entity type
#[derive(Debug, Clone)]
pub struct EntityType {
    name: String,
    collection_id: String,
    properties: Vec<PropertyMapping>,
    navigations: Vec<OwnedNavigation>,
    ownership: Option<Ownership>,
    discriminator: Option<Discriminator>,
}

impl EntityType {
    /// Entity type name (unique within a model)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name used in diagnostics
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Whether instances are stored as top-level documents
    pub fn is_document_root(&self) -> bool {
        self.ownership.is_none()
    }

    /// Target collection of the documents of this type
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// All scalar property mappings, in declaration order
    pub fn properties(&self) -> &[PropertyMapping] {
        &self.properties
    }

    /// Key property mappings, in declaration order
    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyMapping> {
        self.properties.iter().filter(|p| p.is_key)
    }

    /// Find a property mapping by property name
    pub fn find_property(&self, name: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Property mapped to the document `id` field, if any
    pub fn id_property(&self) -> Option<&PropertyMapping> {
        self.properties
            .iter()
            .find(|p| p.field == crate::document::ID_FIELD)
    }

    /// Owned navigations, in declaration order
    pub fn navigations(&self) -> &[OwnedNavigation] {
        &self.navigations
    }

    /// Ownership edge (`None` for document roots)
    pub fn ownership(&self) -> Option<&Ownership> {
        self.ownership.as_ref()
    }

    /// Discriminator (`None` outside inheritance hierarchies)
    pub fn discriminator(&self) -> Option<&Discriminator> {
        self.discriminator.as_ref()
    }
}

/// Builder for [`EntityType`]
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    name: String,
    collection_id: Option<String>,
    properties: Vec<PropertyMapping>,
    navigations: Vec<OwnedNavigation>,
    ownership: Option<Ownership>,
    discriminator: Option<Discriminator>,
}

impl EntityTypeBuilder {
    fn new(name: impl Into<String>, ownership: Option<Ownership>) -> Self {
        EntityTypeBuilder {
            name: name.into(),
            collection_id: None,
            properties: Vec::new(),
            navigations: Vec::new(),
            ownership,
            discriminator: None,
        }
    }

    /// Start a document-root entity type
    pub fn root(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// Start an entity type owned by `principal`
    pub fn owned(name: impl Into<String>, principal: impl Into<String>) -> Self {
        Self::new(
            name,
            Some(Ownership {
                principal: principal.into(),
            }),
        )
    }

    /// Set the collection id (defaults to the type name)
    pub fn collection(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    /// Add a key property stored under its own name
    pub fn key(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.push_property(name.clone(), name, true)
    }

    /// Add a key property stored under `field`
    pub fn key_mapped(self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.push_property(name.into(), field.into(), true)
    }

    /// Add a scalar property stored under its own name
    pub fn property(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.push_property(name.clone(), name, false)
    }

    /// Add a scalar property stored under `field`
    pub fn property_mapped(self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.push_property(name.into(), field.into(), false)
    }

    /// Embed a single owned entity of type `target` under `field`
    pub fn owns_one(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.navigations.push(OwnedNavigation {
            field: field.into(),
            target: target.into(),
            cardinality: Cardinality::One,
        });
        self
    }

    /// Embed a collection of owned entities of type `target` under `field`
    pub fn owns_many(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.navigations.push(OwnedNavigation {
            field: field.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
        });
        self
    }

    /// Stamp `value` under `field` to identify this concrete type
    pub fn discriminator(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.discriminator = Some(Discriminator {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    fn push_property(mut self, name: String, field: String, is_key: bool) -> Self {
        self.properties.push(PropertyMapping {
            name,
            field,
            is_key,
        });
        self
    }

    fn build(self) -> Result<EntityType> {
        if let Some(discriminator) = &self.discriminator {
            if discriminator.field == ID_FIELD || discriminator.field == PARTITION_KEY_FIELD {
                return Err(Error::invalid_model(format!(
                    "'{}' uses the reserved field '{}' as discriminator",
                    self.name, discriminator.field
                )));
            }
        }

        if self.ownership.is_none() {
            if let Some(navigation) = self.navigations.iter().find(|n| n.field == ID_FIELD) {
                return Err(Error::invalid_model(format!(
                    "'{}' maps navigation '{}' onto the reserved field '{}'",
                    self.name, navigation.target, ID_FIELD
                )));
            }
        }

        let mut fields = FxHashSet::default();
        for field in self
            .properties
            .iter()
            .map(|p| &p.field)
            .chain(self.navigations.iter().map(|n| &n.field))
        {
            if field == PARTITION_KEY_FIELD {
                return Err(Error::invalid_model(format!(
                    "'{}' maps the reserved field '{}'",
                    self.name, PARTITION_KEY_FIELD
                )));
            }
            if let Some(discriminator) = &self.discriminator {
                if *field == discriminator.field {
                    return Err(Error::invalid_model(format!(
                        "'{}' maps the discriminator field '{}'",
                        self.name, field
                    )));
                }
            }
            if !fields.insert(field.as_str()) {
                return Err(Error::invalid_model(format!(
                    "'{}' maps the field '{}' more than once",
                    self.name, field
                )));
            }
        }

        if self.ownership.is_none() && !self.properties.iter().any(|p| p.is_key) {
            return Err(Error::invalid_model(format!(
                "document root '{}' has no key property",
                self.name
            )));
        }

        Ok(EntityType {
            collection_id: self.collection_id.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            properties: self.properties,
            navigations: self.navigations,
            ownership: self.ownership,
            discriminator: self.discriminator,
        })
    }
}

/// Validated registry of entity types
#[derive(Debug, Clone, Default)]
pub struct Model {
    types: FxHashMap<String, Arc<EntityType>>,
    order: Vec<String>,
}

impl Model {
    /// Start building a model
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Look up an entity type by name
    pub fn get(&self, name: &str) -> Option<Arc<EntityType>> {
        self.types.get(name).cloned()
    }

    /// Look up an entity type by name, failing if it is unknown
    pub fn entity_type(&self, name: &str) -> Result<Arc<EntityType>> {
        self.get(name)
            .ok_or_else(|| Error::UnknownEntityType(name.to_string()))
    }

    /// Entity types in registration order
    pub fn entity_types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    /// Number of entity types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the model has no entity types
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Builder for [`Model`]
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: Vec<EntityTypeBuilder>,
}

impl ModelBuilder {
    /// Register an entity type
    pub fn entity(mut self, entity: EntityTypeBuilder) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate and freeze the model
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModel`] on duplicate names, dangling ownership
    /// or navigation targets, reserved field collisions, keyless roots,
    /// owned types with no embedding navigation, or ownership cycles.
    pub fn build(self) -> Result<Model> {
        let mut model = Model::default();
        for builder in self.entities {
            let entity = builder.build()?;
            if model.types.contains_key(entity.name()) {
                return Err(Error::invalid_model(format!(
                    "entity type '{}' is registered twice",
                    entity.name()
                )));
            }
            model.order.push(entity.name().to_string());
            model
                .types
                .insert(entity.name().to_string(), Arc::new(entity));
        }

        for entity in model.types.values() {
            for nav in entity.navigations() {
                let target = model.types.get(&nav.target).ok_or_else(|| {
                    Error::invalid_model(format!(
                        "'{}.{}' targets unknown type '{}'",
                        entity.name(),
                        nav.field,
                        nav.target
                    ))
                })?;
                match target.ownership() {
                    Some(ownership) if ownership.principal == entity.name() => {}
                    _ => {
                        return Err(Error::invalid_model(format!(
                            "'{}.{}' targets '{}', which is not owned by '{}'",
                            entity.name(),
                            nav.field,
                            nav.target,
                            entity.name()
                        )))
                    }
                }
            }

            if let Some(ownership) = entity.ownership() {
                let principal = model.types.get(&ownership.principal).ok_or_else(|| {
                    Error::invalid_model(format!(
                        "'{}' is owned by unknown type '{}'",
                        entity.name(),
                        ownership.principal
                    ))
                })?;
                if !principal
                    .navigations()
                    .iter()
                    .any(|nav| nav.target == entity.name())
                {
                    return Err(Error::invalid_model(format!(
                        "'{}' has no navigation embedding owned type '{}'",
                        principal.name(),
                        entity.name()
                    )));
                }
            }
        }

        for entity in model.types.values() {
            model.check_reaches_root(entity)?;
        }

        Ok(model)
    }
}

impl Model {
    fn check_reaches_root(&self, entity: &EntityType) -> Result<()> {
        let mut visited = FxHashSet::default();
        let mut current = entity;
        while let Some(ownership) = current.ownership() {
            if !visited.insert(current.name()) {
                return Err(Error::invalid_model(format!(
                    "ownership of '{}' forms a cycle",
                    entity.name()
                )));
            }
            current = self
                .types
                .get(&ownership.principal)
                .map(|principal| principal.as_ref())
                .ok_or_else(|| Error::UnknownEntityType(ownership.principal.clone()))?;
        }
        Ok(())
    }
}
