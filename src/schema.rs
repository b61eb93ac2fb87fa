//! Schema descriptors and import bookkeeping types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle status of a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaStatus {
    #[default]
    Draft,
    Published,
    Error,
    Demo,
}

/// What a schema belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaCategory {
    #[default]
    Policy,
    Tool,
    System,
}

impl std::str::FromStr for SchemaCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POLICY" => Ok(SchemaCategory::Policy),
            "TOOL" => Ok(SchemaCategory::Tool),
            "SYSTEM" => Ok(SchemaCategory::System),
            other => Err(format!("unknown schema category: {}", other)),
        }
    }
}

/// Build the IRI of a schema from its uuid
pub fn iri_for(uuid: &str) -> String {
    format!("#{}", uuid)
}

/// Strip the leading `#` from an IRI
pub fn uuid_from_iri(iri: &str) -> Option<&str> {
    iri.strip_prefix('#').filter(|uuid| !uuid.is_empty())
}

/// A newer published version of a schema, attached during preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHint {
    pub message_id: Option<String>,
    pub version: String,
    pub name: String,
    pub topic_id: Option<String>,
}

/// A schema as it moves through load, remap, resolve and commit.
///
/// Field names serialize in the camelCase form used on the message log and in
/// exported bundles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    /// Store-local identifier, assigned on commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub iri: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    #[serde(default)]
    pub document: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default, rename = "documentURL", alias = "documentUrl")]
    pub document_url: Option<String>,
    #[serde(default, rename = "contextURL", alias = "contextUrl")]
    pub context_url: Option<String>,
    #[serde(default)]
    pub status: SchemaStatus,
    #[serde(default)]
    pub category: SchemaCategory,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_version: Option<String>,
    /// SHA256 of the committed document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_versions: Vec<VersionHint>,
}

impl SchemaDescriptor {
    /// Create an empty draft descriptor with a document
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, document: Value) -> Self {
        let mut descriptor = Self {
            uuid: uuid.into(),
            name: name.into(),
            document: Some(document),
            ..Self::default()
        };
        descriptor.update_iri();
        descriptor
    }

    /// Derive `iri` from `uuid`; an empty uuid has no IRI
    pub fn update_iri(&mut self) {
        self.iri = if self.uuid.is_empty() {
            None
        } else {
            Some(iri_for(&self.uuid))
        };
    }

    /// The IRI, or an empty string when the schema has none
    pub fn iri_str(&self) -> &str {
        self.iri.as_deref().unwrap_or("")
    }

    /// Keys of the document's `$defs`
    pub fn def_keys(&self) -> Vec<String> {
        self.document
            .as_ref()
            .map(crate::document::def_keys)
            .unwrap_or_default()
    }

    /// A short label for progress messages
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            "-"
        } else {
            &self.name
        }
    }
}

/// One row of the old → new identity table produced by an import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImportSchemaMap {
    /// Per-batch correlation key between this row and its schema
    #[serde(skip)]
    pub key: String,
    #[serde(rename = "oldID")]
    pub old_id: Option<String>,
    #[serde(rename = "newID")]
    pub new_id: Option<String>,
    #[serde(rename = "oldUUID")]
    pub old_uuid: Option<String>,
    #[serde(rename = "newUUID")]
    pub new_uuid: Option<String>,
    #[serde(rename = "oldIRI")]
    pub old_iri: Option<String>,
    #[serde(rename = "newIRI")]
    pub new_iri: Option<String>,
    #[serde(rename = "oldMessageID")]
    pub old_message_id: Option<String>,
    #[serde(rename = "newMessageID")]
    pub new_message_id: Option<String>,
}

/// Identity table of a batch, in processing order, addressable by key
#[derive(Debug, Clone, Default)]
pub struct SchemaMapping {
    entries: Vec<ImportSchemaMap>,
    by_key: HashMap<String, usize>,
}

impl SchemaMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its correlation key
    pub fn push(&mut self, mut entry: ImportSchemaMap) -> String {
        if entry.key.is_empty() {
            entry.key = uuid::Uuid::new_v4().to_string();
        }
        let key = entry.key.clone();
        self.by_key.insert(key.clone(), self.entries.len());
        self.entries.push(entry);
        key
    }

    pub fn get(&self, key: &str) -> Option<&ImportSchemaMap> {
        self.by_key.get(key).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ImportSchemaMap> {
        match self.by_key.get(key) {
            Some(&i) => self.entries.get_mut(i),
            None => None,
        }
    }

    pub fn entries(&self) -> &[ImportSchemaMap] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `oldID` and `oldMessageID` → committed `newID`, for rows that were committed
    pub fn committed_ids(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for entry in &self.entries {
            let Some(new_id) = &entry.new_id else {
                continue;
            };
            if let Some(old_id) = &entry.old_id {
                map.insert(old_id.clone(), new_id.clone());
            }
            if let Some(old_message_id) = &entry.old_message_id {
                map.insert(old_message_id.clone(), new_id.clone());
            }
        }
        map
    }

    pub fn into_entries(self) -> Vec<ImportSchemaMap> {
        self.entries
    }
}

/// A per-schema problem that did not stop the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaIssue {
    #[serde(rename = "type")]
    pub kind: String,
    pub uuid: String,
    pub name: String,
    pub error: String,
}

impl SchemaIssue {
    pub fn schema(descriptor: &SchemaDescriptor, error: impl Into<String>) -> Self {
        Self {
            kind: "schema".to_string(),
            uuid: descriptor.uuid.clone(),
            name: descriptor.name.clone(),
            error: error.into(),
        }
    }
}

/// Outcome of an import entry point
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub schemas_map: Vec<ImportSchemaMap>,
    pub errors: Vec<SchemaIssue>,
}

/// Who is importing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    /// Account the schemas are created by
    pub creator: String,
    /// Owner stamped on the schemas
    pub owner: String,
    /// User id used when signing log messages
    #[serde(default)]
    pub id: Option<String>,
}

impl Owner {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            creator: name.clone(),
            owner: name,
            id: None,
        }
    }
}

/// How imported schemas are stamped and whether they are published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Common,
    Demo,
}

/// Topic id meaning "do not publish"
pub const DRAFT_TOPIC: &str = "draft";

/// Options shared by the import entry points
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Target topic; `None` and `"draft"` mean draft
    pub topic_id: Option<String>,
    pub category: SchemaCategory,
    /// Keep the incoming uuids instead of generating new ones
    #[serde(default)]
    pub skip_generate_id: bool,
    #[serde(default)]
    pub mode: ImportMode,
    /// Delete already-saved rows of the batch when commit fails
    #[serde(default)]
    pub rollback_on_failure: bool,
}

impl ImportOptions {
    pub fn new(topic_id: Option<String>, category: SchemaCategory) -> Self {
        Self {
            topic_id,
            category,
            ..Self::default()
        }
    }

    /// The topic imported schemas are stamped with
    pub fn effective_topic(&self) -> String {
        match self.topic_id.as_deref() {
            Some(topic) if !topic.is_empty() => topic.to_string(),
            _ => DRAFT_TOPIC.to_string(),
        }
    }

    /// Topic to publish creation messages to, if any
    pub fn publish_topic(&self) -> Option<String> {
        if self.mode == ImportMode::Demo {
            return None;
        }
        let topic = self.effective_topic();
        (topic != DRAFT_TOPIC).then_some(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_iri_follows_uuid() {
        let mut d = SchemaDescriptor::new("u1", "A", json!({}));
        assert_eq!(d.iri.as_deref(), Some("#u1"));
        d.uuid.clear();
        d.update_iri();
        assert!(d.iri.is_none());
        assert_eq!(uuid_from_iri("#u1"), Some("u1"));
        assert_eq!(uuid_from_iri("#"), None);
    }

    #[test]
    fn test_descriptor_wire_names() {
        let d: SchemaDescriptor = serde_json::from_value(json!({
            "uuid": "u1",
            "iri": "#u1",
            "messageId": "1.1",
            "topicId": "0.0.1",
            "status": "PUBLISHED",
            "category": "TOOL",
            "contextURL": "schema:u1"
        }))
        .unwrap();
        assert_eq!(d.message_id.as_deref(), Some("1.1"));
        assert_eq!(d.status, SchemaStatus::Published);
        assert_eq!(d.category, SchemaCategory::Tool);
        assert_eq!(d.context_url.as_deref(), Some("schema:u1"));
    }

    #[test]
    fn test_mapping_lookup_by_key() {
        let mut mapping = SchemaMapping::new();
        let a = mapping.push(ImportSchemaMap {
            old_id: Some("1".into()),
            old_message_id: Some("m1".into()),
            ..Default::default()
        });
        let b = mapping.push(ImportSchemaMap::default());
        mapping.get_mut(&b).unwrap().new_id = Some("20".into());
        mapping.get_mut(&a).unwrap().new_id = Some("10".into());

        assert_eq!(mapping.entries()[0].new_id.as_deref(), Some("10"));
        assert_eq!(mapping.entries()[1].new_id.as_deref(), Some("20"));

        let ids = mapping.committed_ids();
        assert_eq!(ids.get("1").map(String::as_str), Some("10"));
        assert_eq!(ids.get("m1").map(String::as_str), Some("10"));
    }

    #[test]
    fn test_mapping_serializes_spec_names() {
        let entry = ImportSchemaMap {
            key: "k".into(),
            old_uuid: Some("u1".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["oldUUID"], json!("u1"));
        assert!(value.get("key").is_none());
    }

    #[test]
    fn test_publish_topic() {
        let mut options = ImportOptions::new(None, SchemaCategory::Policy);
        assert_eq!(options.effective_topic(), "draft");
        assert_eq!(options.publish_topic(), None);

        options.topic_id = Some("0.0.42".into());
        assert_eq!(options.publish_topic().as_deref(), Some("0.0.42"));

        options.mode = ImportMode::Demo;
        assert_eq!(options.publish_topic(), None);
        assert_eq!(options.effective_topic(), "0.0.42");
    }
}
