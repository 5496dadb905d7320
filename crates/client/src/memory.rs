//! In-memory document store
//!
//! `MemoryDocumentStore` keeps documents in `collection -> id -> Document`
//! maps behind a `parking_lot::RwLock` and journals every operation it
//! receives, which lets tests assert exactly which writes a save issued.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = Arc::new(MemoryDocumentStore::new());
//! let pipeline = SavePipeline::new(Arc::clone(&store), SaveConfig::default());
//!
//! pipeline.save_changes(&mut tracker)?;
//! assert_eq!(store.len("Customers"), 1);
//! ```

use crate::client::{AsyncDocumentClient, DocumentClient, WriteOutcome};
use async_trait::async_trait;
use nestdoc_core::{Document, Error, Result};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Kind of document operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Insert of a new document
    Create,
    /// Overwrite of an existing document
    Replace,
    /// Removal of a document
    Delete,
}

/// Journal entry for one operation received by the store
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Operation kind
    pub kind: OperationKind,
    /// Target collection
    pub collection_id: String,
    /// Target document id
    pub document_id: String,
    /// What the store did
    pub outcome: WriteOutcome,
}

/// In-process document store
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<FxHashMap<String, BTreeMap<String, Document>>>,
    journal: Mutex<Vec<Operation>>,
    fail_next: Mutex<Option<OperationKind>>,
}

impl MemoryDocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document directly, bypassing the journal
    ///
    /// Used to seed existing state. Returns an error if the document has no
    /// `id` field.
    pub fn seed(&self, collection_id: &str, document: Document) -> Result<()> {
        let id = document_id(&document)?;
        self.collections
            .write()
            .entry(collection_id.to_string())
            .or_default()
            .insert(id, document);
        Ok(())
    }

    /// Read a document
    pub fn get(&self, collection_id: &str, document_id: &str) -> Option<Document> {
        self.collections
            .read()
            .get(collection_id)
            .and_then(|docs| docs.get(document_id))
            .cloned()
    }

    /// Number of documents in a collection
    pub fn len(&self, collection_id: &str) -> usize {
        self.collections
            .read()
            .get(collection_id)
            .map_or(0, BTreeMap::len)
    }

    /// Whether a collection holds no documents
    pub fn is_empty(&self, collection_id: &str) -> bool {
        self.len(collection_id) == 0
    }

    /// All operations received so far, in arrival order
    pub fn operations(&self) -> Vec<Operation> {
        self.journal.lock().clone()
    }

    /// Forget the journal
    pub fn clear_operations(&self) {
        self.journal.lock().clear();
    }

    /// Make the next operation of `kind` fail with a store error
    pub fn fail_next(&self, kind: OperationKind) {
        *self.fail_next.lock() = Some(kind);
    }

    fn check_injected_failure(&self, kind: OperationKind) -> Result<()> {
        let mut fail_next = self.fail_next.lock();
        if *fail_next == Some(kind) {
            *fail_next = None;
            return Err(Error::store(format!("injected {:?} failure", kind)));
        }
        Ok(())
    }

    fn record(
        &self,
        kind: OperationKind,
        collection_id: &str,
        document_id: &str,
        outcome: WriteOutcome,
    ) -> WriteOutcome {
        trace!(
            target: "nestdoc::store",
            ?kind,
            collection = collection_id,
            id = document_id,
            %outcome,
            "memory store operation"
        );
        self.journal.lock().push(Operation {
            kind,
            collection_id: collection_id.to_string(),
            document_id: document_id.to_string(),
            outcome,
        });
        outcome
    }

    fn create(&self, collection_id: &str, document: &Document) -> Result<WriteOutcome> {
        self.check_injected_failure(OperationKind::Create)?;
        let id = document_id(document)?;
        let outcome = {
            let mut collections = self.collections.write();
            let docs = collections.entry(collection_id.to_string()).or_default();
            if docs.contains_key(&id) {
                WriteOutcome::Conflict
            } else {
                docs.insert(id.clone(), document.clone());
                WriteOutcome::Written
            }
        };
        Ok(self.record(OperationKind::Create, collection_id, &id, outcome))
    }

    fn replace(
        &self,
        collection_id: &str,
        document_id: &str,
        document: &Document,
    ) -> Result<WriteOutcome> {
        self.check_injected_failure(OperationKind::Replace)?;
        let outcome = {
            let mut collections = self.collections.write();
            match collections
                .get_mut(collection_id)
                .and_then(|docs| docs.get_mut(document_id))
            {
                Some(existing) => {
                    *existing = document.clone();
                    WriteOutcome::Written
                }
                None => WriteOutcome::NotFound,
            }
        };
        Ok(self.record(OperationKind::Replace, collection_id, document_id, outcome))
    }

    fn delete(&self, collection_id: &str, document_id: &str) -> Result<WriteOutcome> {
        self.check_injected_failure(OperationKind::Delete)?;
        let removed = self
            .collections
            .write()
            .get_mut(collection_id)
            .and_then(|docs| docs.remove(document_id))
            .is_some();
        let outcome = if removed {
            WriteOutcome::Written
        } else {
            WriteOutcome::NotFound
        };
        Ok(self.record(OperationKind::Delete, collection_id, document_id, outcome))
    }
}

fn document_id(document: &Document) -> Result<String> {
    document
        .id()
        .map(str::to_string)
        .ok_or_else(|| Error::store("document has no string 'id' field"))
}

impl DocumentClient for MemoryDocumentStore {
    fn create_item(&self, collection_id: &str, document: &Document) -> Result<WriteOutcome> {
        self.create(collection_id, document)
    }

    fn replace_item(
        &self,
        collection_id: &str,
        document_id: &str,
        document: &Document,
    ) -> Result<WriteOutcome> {
        self.replace(collection_id, document_id, document)
    }

    fn delete_item(&self, collection_id: &str, document_id: &str) -> Result<WriteOutcome> {
        self.delete(collection_id, document_id)
    }
}

#[async_trait]
impl AsyncDocumentClient for MemoryDocumentStore {
    async fn create_item(
        &self,
        collection_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome> {
        suspend(cancel).await?;
        self.create(collection_id, document)
    }

    async fn replace_item(
        &self,
        collection_id: &str,
        document_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome> {
        suspend(cancel).await?;
        self.replace(collection_id, document_id, document)
    }

    async fn delete_item(
        &self,
        collection_id: &str,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome> {
        suspend(cancel).await?;
        self.delete(collection_id, document_id)
    }
}

/// Yield once, then fail if the save was cancelled in the meantime
async fn suspend(cancel: &CancellationToken) -> Result<()> {
    tokio::task::yield_now().await;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
