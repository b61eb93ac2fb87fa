//! Schema export
//!
//! Collects the requested schemas plus the schemas their `$defs` name. Stored
//! documents carry their definitions flattened, so one extra fetch covers the
//! whole closure of a well-formed schema.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::builtin::is_builtin;
use crate::error::Result;
use crate::refs::RefGraph;
use crate::schema::SchemaDescriptor;
use crate::services::{DocumentStore, SchemaFilter};

/// Builds deduplicated export sets
#[derive(Debug, Clone)]
pub struct SchemaExporter {
    store: Arc<dyn DocumentStore>,
}

impl SchemaExporter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The requested schemas followed by the definitions they use
    pub async fn export_schemas(&self, ids: &[String]) -> Result<Vec<SchemaDescriptor>> {
        let schemas = self.store.get_schemas_by_ids(ids).await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut export = Vec::with_capacity(schemas.len());
        for schema in schemas {
            if seen.insert(schema.iri_str().to_string()) {
                export.push(schema);
            }
        }

        let mut missing: Vec<String> = Vec::new();
        for schema in &export {
            for key in schema.def_keys() {
                if !seen.contains(&key) && !is_builtin(&key) && !missing.contains(&key) {
                    missing.push(key);
                }
            }
        }

        if !missing.is_empty() {
            debug!(count = missing.len(), "fetching referenced definitions");
            let defs = self.store.get_schemas(&SchemaFilter::by_iris(missing)).await?;
            for schema in defs {
                if seen.insert(schema.iri_str().to_string()) {
                    export.push(schema);
                }
            }
        }

        let graph = RefGraph::from_documents(
            export
                .iter()
                .filter_map(|s| Some((s.iri.as_deref()?, s.document.as_ref()?))),
        );
        for schema in &export {
            let unexported: Vec<String> = graph
                .closure(schema.iri_str())
                .into_iter()
                .filter(|iri| !seen.contains(iri) && !is_builtin(iri))
                .collect();
            if !unexported.is_empty() {
                warn!(iri = %schema.iri_str(), missing = ?unexported, "export does not contain every referenced schema");
            }
        }

        info!(requested = ids.len(), exported = export.len(), "schemas exported");
        Ok(export)
    }
}
