//! Core types for nestdoc
//!
//! This crate defines the foundational types used by the save pipeline:
//! - Document: JSON object payload written to the document store
//! - EntityType / Model: how entities map onto documents
//! - EntityState: lifecycle of a tracked entity
//! - ChangeTracker / ChangeRecord: the tracked change-set
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod model;
pub mod state;
pub mod tracker;

pub use document::{Document, DEFAULT_PARTITION_KEY_VALUE, ID_FIELD, PARTITION_KEY_FIELD};
pub use error::{Error, Result};
pub use model::{
    Cardinality, Discriminator, EntityType, EntityTypeBuilder, Model, ModelBuilder,
    OwnedNavigation, Ownership, PropertyMapping,
};
pub use state::EntityState;
pub use tracker::{ChangeRecord, ChangeTracker, RecordId};
