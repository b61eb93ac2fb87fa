//! Content checksums for committed schema documents

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex SHA-256 of a schema document, stored as the descriptor's `hash`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Hash a document in its serialized form.
    ///
    /// `serde_json` keeps object keys sorted, so equal documents hash equally
    /// regardless of the key order they were parsed with. A missing document
    /// hashes as `null`.
    pub fn of_document(document: Option<&Value>) -> Self {
        let canonical = serde_json::to_vec(document.unwrap_or(&Value::Null)).unwrap_or_default();
        Self(format!("{:x}", Sha256::digest(&canonical)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
