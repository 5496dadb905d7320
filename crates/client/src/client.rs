//! Document client contract
//!
//! Store failures (transport errors, throttling, malformed payloads) are
//! returned as [`Error::Store`](nestdoc_core::Error::Store) and are fatal to
//! the save in progress. Outcomes the store recognises but that wrote
//! nothing, such as a create hitting an existing id, are reported through
//! [`WriteOutcome`] instead so callers can tell them apart from a write.

use async_trait::async_trait;
use nestdoc_core::{Document, Result};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of one document operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOutcome {
    /// The store applied the operation
    Written,
    /// A create found a document with the same id already present
    Conflict,
    /// A replace or delete found no document with the given id
    NotFound,
}

impl WriteOutcome {
    /// Whether the store applied the operation
    pub fn is_written(self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::Written => f.write_str("written"),
            WriteOutcome::Conflict => f.write_str("conflict"),
            WriteOutcome::NotFound => f.write_str("not found"),
        }
    }
}

/// Blocking document store operations
///
/// Thread safety: implementations must be safe to share between threads
/// (requires Send + Sync).
pub trait DocumentClient: Send + Sync {
    /// Insert a new document into `collection_id`
    ///
    /// The document id is taken from the document's `id` field.
    fn create_item(&self, collection_id: &str, document: &Document) -> Result<WriteOutcome>;

    /// Overwrite the document `document_id` in `collection_id`
    fn replace_item(
        &self,
        collection_id: &str,
        document_id: &str,
        document: &Document,
    ) -> Result<WriteOutcome>;

    /// Remove the document `document_id` from `collection_id`
    fn delete_item(&self, collection_id: &str, document_id: &str) -> Result<WriteOutcome>;
}

/// Asynchronous document store operations
///
/// Each call is an independent suspension point. Implementations should
/// return [`Error::Cancelled`](nestdoc_core::Error::Cancelled) when `cancel`
/// fires before the operation is issued.
#[async_trait]
pub trait AsyncDocumentClient: Send + Sync {
    /// Insert a new document into `collection_id`
    async fn create_item(
        &self,
        collection_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome>;

    /// Overwrite the document `document_id` in `collection_id`
    async fn replace_item(
        &self,
        collection_id: &str,
        document_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome>;

    /// Remove the document `document_id` from `collection_id`
    async fn delete_item(
        &self,
        collection_id: &str,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome>;
}

impl<T: DocumentClient + ?Sized> DocumentClient for Arc<T> {
    fn create_item(&self, collection_id: &str, document: &Document) -> Result<WriteOutcome> {
        (**self).create_item(collection_id, document)
    }

    fn replace_item(
        &self,
        collection_id: &str,
        document_id: &str,
        document: &Document,
    ) -> Result<WriteOutcome> {
        (**self).replace_item(collection_id, document_id, document)
    }

    fn delete_item(&self, collection_id: &str, document_id: &str) -> Result<WriteOutcome> {
        (**self).delete_item(collection_id, document_id)
    }
}

#[async_trait]
impl<T: AsyncDocumentClient + ?Sized> AsyncDocumentClient for Arc<T> {
    async fn create_item(
        &self,
        collection_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome> {
        (**self).create_item(collection_id, document, cancel).await
    }

    async fn replace_item(
        &self,
        collection_id: &str,
        document_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome> {
        (**self)
            .replace_item(collection_id, document_id, document, cancel)
            .await
    }

    async fn delete_item(
        &self,
        collection_id: &str,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome> {
        (**self).delete_item(collection_id, document_id, cancel).await
    }
}
