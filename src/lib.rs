//! nestdoc - document persistence for owned entity graphs
//!
//! nestdoc saves tracked entity changes to a document store. Owned entities
//! have no document of their own: they are embedded in the document of
//! their root, so a change anywhere below a root rewrites that root's
//! document exactly once.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use nestdoc::{
//!     ChangeTracker, EntityState, EntityTypeBuilder, MemoryDocumentStore, Model, SaveConfig,
//!     SavePipeline,
//! };
//! use serde_json::json;
//!
//! let model = Model::builder()
//!     .entity(
//!         EntityTypeBuilder::root("Customer")
//!             .key("CustomerId")
//!             .owns_many("Orders", "Order"),
//!     )
//!     .entity(EntityTypeBuilder::owned("Order", "Customer").key("OrderId"))
//!     .build()?;
//! let customer = model.entity_type("Customer")?;
//! let order = model.entity_type("Order")?;
//!
//! let mut tracker = ChangeTracker::new();
//! let alfki = tracker.track(&customer, [("CustomerId", json!("ALFKI"))], EntityState::Added)?;
//! tracker.track_owned(&order, [("OrderId", json!(1))], alfki, EntityState::Added)?;
//!
//! let store = Arc::new(MemoryDocumentStore::new());
//! let pipeline = SavePipeline::new(Arc::clone(&store), SaveConfig::default());
//! assert_eq!(pipeline.save_changes(&mut tracker)?, 1);
//! assert!(store.get("Customer", "Customer|ALFKI").is_some());
//! # Ok::<(), nestdoc::Error>(())
//! ```
//!
//! # Architecture
//!
//! - `nestdoc-core`: entity metadata, change tracking, documents, errors
//! - `nestdoc-client`: the document store contract and an in-memory store
//! - `nestdoc-engine`: root resolution, document mapping, the save pipeline

pub use nestdoc_client::{
    AsyncDocumentClient, DocumentClient, MemoryDocumentStore, Operation, OperationKind,
    WriteOutcome,
};
pub use nestdoc_core::{
    Cardinality, ChangeRecord, ChangeTracker, Discriminator, Document, EntityState, EntityType,
    EntityTypeBuilder, Error, Model, ModelBuilder, OwnedNavigation, Ownership, PropertyMapping,
    RecordId, Result, DEFAULT_PARTITION_KEY_VALUE, ID_FIELD, PARTITION_KEY_FIELD,
};
pub use nestdoc_engine::{
    DocumentSource, DocumentSourceCache, RootResolver, SaveConfig, SavePipeline, CONFIG_FILE_NAME,
};
