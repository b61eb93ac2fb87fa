//! Builtin external schemas
//!
//! Schemas such as GeoJSON are referenced by imported documents but never
//! travel with an import batch. They are compiled into the binary and
//! treated as already resolved.

use include_dir::{include_dir, Dir};
use serde_json::Value;
use tracing::warn;

static BUILTIN_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/builtin");

/// IRI of the builtin GeoJSON schema
pub const GEO_JSON_IRI: &str = "#GeoJSON";

/// IRI of the builtin SentinelHUB schema
pub const SENTINEL_HUB_IRI: &str = "#SentinelHUB";

/// A builtin schema document
#[derive(Debug, Clone)]
pub struct BuiltinSchema {
    pub iri: String,
    pub title: String,
    pub document: Value,
}

/// All embedded builtin schemas, ordered by file name
pub fn builtin_schemas() -> Vec<BuiltinSchema> {
    let mut files: Vec<_> = BUILTIN_DIR
        .files()
        .filter(|f| f.path().extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    files.sort_by(|a, b| a.path().cmp(b.path()));

    files
        .into_iter()
        .filter_map(|file| {
            let content = file.contents_utf8()?;
            let document: Value = match serde_json::from_str(content) {
                Ok(document) => document,
                Err(e) => {
                    warn!(path = %file.path().display(), error = %e, "skipping malformed builtin schema");
                    return None;
                }
            };
            let iri = document.get("$id").and_then(Value::as_str)?.to_string();
            let title = document
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(&iri)
                .to_string();
            Some(BuiltinSchema { iri, title, document })
        })
        .collect()
}

/// Whether an IRI names a builtin schema
pub fn is_builtin(iri: &str) -> bool {
    iri == GEO_JSON_IRI || iri == SENTINEL_HUB_IRI
}
