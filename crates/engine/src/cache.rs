//! Per-entity-type document source cache
//!
//! Exactly one [`DocumentSource`] exists per entity type for the lifetime
//! of the cache. Sources are created lazily on first use; the map is a
//! `DashMap` so a pipeline shared across threads inserts each source once.

use crate::source::DocumentSource;
use dashmap::DashMap;
use nestdoc_core::EntityType;
use std::sync::Arc;

/// Cache of document sources keyed by entity type name
#[derive(Debug, Default)]
pub struct DocumentSourceCache {
    sources: DashMap<String, Arc<DocumentSource>>,
}

impl DocumentSourceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the source for `entity_type`, creating it on first use
    pub fn get_or_create(&self, entity_type: &Arc<EntityType>) -> Arc<DocumentSource> {
        if let Some(source) = self.sources.get(entity_type.name()) {
            return Arc::clone(source.value());
        }

        // Use entry API for atomic get-or-insert
        let entry = self
            .sources
            .entry(entity_type.name().to_string())
            .or_insert_with(|| Arc::new(DocumentSource::new(Arc::clone(entity_type))));
        Arc::clone(entry.value())
    }

    /// Whether a source exists for the named entity type
    pub fn contains(&self, entity_type: &str) -> bool {
        self.sources.contains_key(entity_type)
    }

    /// Number of cached sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source has been created yet
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
