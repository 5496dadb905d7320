//! Save engine for nestdoc
//!
//! This crate turns tracked entity changes into document-store writes:
//! - DocumentSource: per-type mapping from records to documents
//! - DocumentSourceCache: one source per entity type, created lazily
//! - RootResolver: finds the document root owning a nested record
//! - SavePipeline: blocking and async save runs over a document client
//! - SaveConfig: `nestdoc.toml` configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod pipeline;
pub mod resolver;
pub mod source;

pub use cache::DocumentSourceCache;
pub use config::{SaveConfig, CONFIG_FILE_NAME};
pub use pipeline::SavePipeline;
pub use resolver::RootResolver;
pub use source::DocumentSource;
