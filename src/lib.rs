//! Ledger Schemas
//!
//! Import, resolve and export versioned document schemas that are published
//! on an append-only message log and kept in a local document store.
//!
//! ## Features
//!
//! - **Identity Remapping**: Imported schemas get fresh uuids; every reference to the old ones is rewritten
//! - **Definition Resolution**: `$defs` are resolved across the batch and published tool schemas, with cycle detection
//! - **Graceful Degradation**: Unresolvable references are dropped and reported instead of failing the batch
//! - **Bookkeeping**: Every import returns an old → new identity table for downstream consumers
//! - **Shared Cache**: Log messages are immutable, so loaded schemas are memoized across imports
//!
//! ## Pipeline
//!
//! ```text
//! message ids ──► RelationshipResolver ──┐
//!                                        ├──► IdentifierRemapper ──► DefinitionResolver ──► CommitPipeline ──► TagRemapper
//! bundle files ──────────────────────────┘
//! ```

pub mod builtin;
pub mod bundle;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod import;
pub mod loader;
pub mod memory;
pub mod refs;
pub mod schema;
pub mod services;
pub mod version;

pub use cache::SchemaCache;
pub use checksum::Checksum;
pub use config::ImportConfig;
pub use error::{ImportError, Result};
pub use export::SchemaExporter;
pub use import::SchemaImporter;
pub use loader::{MessageLoader, RelationshipResolver};
pub use refs::RefGraph;
pub use schema::{
    ImportMode, ImportOptions, ImportResult, ImportSchemaMap, Owner, SchemaCategory,
    SchemaDescriptor, SchemaIssue, SchemaStatus,
};
