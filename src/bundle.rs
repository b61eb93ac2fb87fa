//! Schema bundles
//!
//! A bundle is a directory of descriptor files, one `*.json` file per schema.
//! Files are read in path order, which is the order the batch is imported in.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::OutputFormat;
use crate::error::{ImportError, Result};
use crate::schema::SchemaDescriptor;

/// Read every descriptor file under `dir`
pub fn load_bundle(dir: &Path) -> Result<Vec<SchemaDescriptor>> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
        .collect();
    paths.sort();

    let mut schemas = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let descriptor: SchemaDescriptor = serde_json::from_str(&content).map_err(|e| {
            ImportError::InvalidFormat(format!("{}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), uuid = %descriptor.uuid, "loaded bundle file");
        schemas.push(descriptor);
    }
    info!(dir = %dir.display(), count = schemas.len(), "bundle loaded");
    Ok(schemas)
}

/// Write one file per schema into `dir`, numbered to keep the batch order
pub fn write_bundle(dir: &Path, schemas: &[SchemaDescriptor], format: OutputFormat) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(schemas.len());
    for (index, schema) in schemas.iter().enumerate() {
        let stem = if schema.uuid.is_empty() { "schema" } else { schema.uuid.as_str() };
        let path = dir.join(format!("{:04}-{}.json", index + 1, stem));
        let content = match format {
            OutputFormat::Pretty => serde_json::to_string_pretty(schema)?,
            OutputFormat::Compact => serde_json::to_string(schema)?,
        };
        fs::write(&path, content)?;
        written.push(path);
    }
    info!(dir = %dir.display(), count = written.len(), "bundle written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_then_load_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let schemas: Vec<SchemaDescriptor> = ["zeta", "alpha", "mid"]
            .iter()
            .map(|u| SchemaDescriptor::new(*u, *u, json!({ "$id": format!("#{}", u) })))
            .collect();

        let paths = write_bundle(dir.path(), &schemas, OutputFormat::Compact).unwrap();
        assert_eq!(paths.len(), 3);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = load_bundle(dir.path()).unwrap();
        let uuids: Vec<&str> = loaded.iter().map(|s| s.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["zeta", "alpha", "mid"]);
        assert_eq!(loaded, schemas);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{ nope").unwrap();
        let err = load_bundle(dir.path()).unwrap_err();
        assert!(matches!(err, ImportError::InvalidFormat(msg) if msg.contains("bad.json")));
    }
}
