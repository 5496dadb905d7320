//! Error types for nestdoc
//!
//! This module defines the single error type shared by every layer of the
//! save pipeline. We use `thiserror` for automatic `Display` and `Error`
//! trait implementations.
//!
//! Conditions that merely reduce the write count (a suppressed delete, an
//! update with no effective change, a state that maps to no operation) are
//! not errors and never surface here.

use crate::tracker::RecordId;
use thiserror::Error;

/// Result type alias for nestdoc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by store failures
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for nestdoc
#[derive(Debug, Error)]
pub enum Error {
    /// An owned record is tracked without the record that owns it
    ///
    /// `key_values` is only populated when sensitive data logging is enabled.
    #[error("{}", orphan_message(.entity_type, .owner_type, .key_values))]
    OrphanedNestedDocument {
        /// Display name of the owned entity type
        entity_type: String,
        /// Display name of the expected owner type
        owner_type: String,
        /// Formatted key values of the orphaned record (sensitive)
        key_values: Option<String>,
    },

    /// Following owner links revisited a record
    #[error("Ownership chain of '{entity_type}' loops back on itself")]
    OwnershipCycle {
        /// Entity type of the record where the loop was detected
        entity_type: String,
    },

    /// Entity type name not present in the model
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Record handle does not belong to the tracker
    #[error("Unknown record: {0}")]
    UnknownRecord(RecordId),

    /// Model metadata failed validation
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Owner record has a different type than the ownership edge expects
    #[error("Entity type '{entity_type}' must be owned by '{expected}', got '{actual}'")]
    InvalidOwner {
        /// Owned entity type
        entity_type: String,
        /// Principal type declared by the ownership edge
        expected: String,
        /// Type of the record that was supplied as owner
        actual: String,
    },

    /// Document store operation failed
    #[error("Store error: {message}")]
    Store {
        /// Description of the failure
        message: String,
        /// Underlying error, if any
        #[source]
        source: Option<BoxedSource>,
    },

    /// Save was cancelled before all documents were written
    #[error("Save operation cancelled")]
    Cancelled,

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

fn orphan_message(entity_type: &str, owner_type: &str, key_values: &Option<String>) -> String {
    match key_values {
        Some(keys) => format!(
            "The entity of type '{}' with key values {} is mapped as part of the document \
             mapped to '{}', but there is no tracked entity of this type with the \
             corresponding key value.",
            entity_type, keys, owner_type
        ),
        None => format!(
            "The entity of type '{}' is mapped as part of the document mapped to '{}', \
             but there is no tracked entity of this type with the corresponding key value. \
             Enable sensitive data logging to see the key values.",
            entity_type, owner_type
        ),
    }
}

impl Error {
    /// Create a store error from a message
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error wrapping an underlying cause
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid-model error
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Error::InvalidModel(message.into())
    }

    /// Whether this error came from the document store
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::store_with_source("document serialization failed", e)
    }
}
