//! Document client layer for nestdoc
//!
//! This crate defines the contract the save pipeline uses to talk to a
//! document store:
//! - DocumentClient: blocking create/replace/delete by collection and id
//! - AsyncDocumentClient: the same operations as cancellable futures
//! - WriteOutcome: whether an operation actually wrote anything
//!
//! It also ships [`MemoryDocumentStore`], an in-process store implementing
//! both traits, used by tests and embedders without a remote backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod memory;

pub use client::{AsyncDocumentClient, DocumentClient, WriteOutcome};
pub use memory::{MemoryDocumentStore, Operation, OperationKind};
