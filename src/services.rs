//! Collaborators of the import engine
//!
//! The engine talks to four external systems: the append-only message log,
//! the local document store, the tag store and the account directory. Each is
//! an async trait so the pipeline can be driven against real services or the
//! in-memory implementations in [`crate::memory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use tracing::{error, info};

use crate::error::{ImportError, Result};
use crate::schema::{Owner, SchemaDescriptor, SchemaStatus};

/// Kind of a log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Schema,
    Tag,
}

/// What a log message announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageAction {
    PublishSchema,
    CreateSchema,
    PublishTag,
}

/// A message as stored on the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub topic_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub action: MessageAction,
    pub payload: Value,
}

impl RawMessage {
    /// A schema message carrying a descriptor; id and topic are assigned by the log
    pub fn schema(action: MessageAction, descriptor: &SchemaDescriptor) -> Result<Self> {
        let mut payload = serde_json::to_value(descriptor)?;
        if let Some(obj) = payload.as_object_mut() {
            for local in ["id", "messageId", "topicId", "errors", "newVersions"] {
                obj.remove(local);
            }
        }
        Ok(Self {
            id: String::new(),
            topic_id: String::new(),
            message_type: MessageType::Schema,
            action,
            payload,
        })
    }

    /// A tag message; id and topic are assigned by the log
    pub fn tag(tag: &TagMessage) -> Result<Self> {
        Ok(Self {
            id: String::new(),
            topic_id: String::new(),
            message_type: MessageType::Tag,
            action: MessageAction::PublishTag,
            payload: serde_json::to_value(tag)?,
        })
    }

    /// Decode a schema message into a published descriptor
    pub fn to_schema(&self) -> Result<SchemaDescriptor> {
        if self.message_type != MessageType::Schema {
            return Err(ImportError::InvalidFormat(format!(
                "message {} is not a schema message",
                self.id
            )));
        }
        let mut descriptor: SchemaDescriptor = serde_json::from_value(self.payload.clone())?;
        descriptor.id = None;
        descriptor.message_id = Some(self.id.clone());
        descriptor.topic_id = Some(self.topic_id.clone());
        descriptor.status = SchemaStatus::Published;
        descriptor.iri = None;
        descriptor.update_iri();
        Ok(descriptor)
    }

    /// Decode a tag message
    pub fn to_tag(&self) -> Result<TagMessage> {
        if self.message_type != MessageType::Tag {
            return Err(ImportError::InvalidFormat(format!(
                "message {} is not a tag message",
                self.id
            )));
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Payload of a published tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TagMessage {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    /// Id or message id of the tagged object
    pub target: String,
    #[serde(default)]
    pub date: Option<String>,
}

/// A tag row in the local tag store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRecord {
    pub uuid: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub entity: Option<String>,
    /// Target as published on the log
    pub target: String,
    /// Store id of the imported target
    pub local_target: Option<String>,
    pub status: String,
    pub topic_id: String,
    pub message_id: String,
    pub date: Option<String>,
    pub document: Option<Value>,
    pub uri: Option<String>,
}

/// Status of tags copied from the log during import
pub const TAG_STATUS_HISTORY: &str = "History";

impl TagRecord {
    /// A history record of a published tag
    pub fn history(message: &RawMessage, tag: TagMessage) -> Self {
        Self {
            uuid: tag.uuid,
            name: tag.name,
            description: tag.description,
            owner: tag.owner,
            entity: tag.entity,
            target: tag.target,
            local_target: None,
            status: TAG_STATUS_HISTORY.to_string(),
            topic_id: message.topic_id.clone(),
            message_id: message.id.clone(),
            date: tag.date,
            document: None,
            uri: None,
        }
    }
}

/// Ledger account used to sign log messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    pub key: String,
}

/// Filter over stored schemas; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct SchemaFilter {
    pub iri: Option<String>,
    pub iris: Option<Vec<String>>,
    pub topic_ids: Option<Vec<String>>,
    /// Skip rows with exactly this `(topic_id, uuid)` pair
    pub exclude_identity: Option<(String, String)>,
}

impl SchemaFilter {
    pub fn by_iri(iri: impl Into<String>) -> Self {
        Self {
            iri: Some(iri.into()),
            ..Self::default()
        }
    }

    pub fn by_iris(iris: Vec<String>) -> Self {
        Self {
            iris: Some(iris),
            ..Self::default()
        }
    }

    pub fn by_topics(topic_ids: Vec<String>) -> Self {
        Self {
            topic_ids: Some(topic_ids),
            ..Self::default()
        }
    }

    /// Rows sharing `iri` under a different `(topic_id, uuid)` pair
    pub fn conflicts_with(descriptor: &SchemaDescriptor) -> Self {
        Self {
            iri: Some(descriptor.iri_str().to_string()),
            exclude_identity: Some((
                descriptor.topic_id.clone().unwrap_or_default(),
                descriptor.uuid.clone(),
            )),
            ..Self::default()
        }
    }

    pub fn matches(&self, descriptor: &SchemaDescriptor) -> bool {
        let iri = descriptor.iri_str();
        let topic = descriptor.topic_id.as_deref().unwrap_or("");

        if let Some(expected) = &self.iri {
            if iri != expected {
                return false;
            }
        }
        if let Some(iris) = &self.iris {
            if !iris.iter().any(|i| i == iri) {
                return false;
            }
        }
        if let Some(topics) = &self.topic_ids {
            if !topics.iter().any(|t| t == topic) {
                return false;
            }
        }
        if let Some((excluded_topic, excluded_uuid)) = &self.exclude_identity {
            if topic == excluded_topic && &descriptor.uuid == excluded_uuid {
                return false;
            }
        }
        true
    }
}

/// A tool or policy that owns a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub id: String,
    pub name: String,
    pub topic_id: String,
    pub status: ModuleStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleStatus {
    #[default]
    Draft,
    Published,
}

/// Filter over tools and policies
#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    pub topic_id: Option<String>,
    pub status: Option<ModuleStatus>,
}

impl ModuleFilter {
    pub fn by_topic(topic_id: impl Into<String>) -> Self {
        Self {
            topic_id: Some(topic_id.into()),
            status: None,
        }
    }

    pub fn published() -> Self {
        Self {
            topic_id: None,
            status: Some(ModuleStatus::Published),
        }
    }

    pub fn matches(&self, module: &ModuleRecord) -> bool {
        self.topic_id.as_ref().map_or(true, |t| &module.topic_id == t)
            && self.status.map_or(true, |s| module.status == s)
    }
}

/// The append-only message log
#[async_trait]
pub trait MessageLog: Send + Sync + Debug {
    /// Fetch one message by id
    async fn get_message(&self, id: &str, message_type: MessageType) -> Result<RawMessage>;

    /// All messages of a topic with the given type and action, in log order
    async fn get_messages(
        &self,
        topic_id: &str,
        message_type: MessageType,
        action: MessageAction,
    ) -> Result<Vec<RawMessage>>;

    /// Append a signed message to a topic, returning the assigned message id
    async fn send_message(
        &self,
        topic_id: &str,
        message: RawMessage,
        account: &Account,
        user_id: Option<&str>,
    ) -> Result<String>;
}

/// Local persistence of schemas, tools and policies
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    async fn get_schemas_by_ids(&self, ids: &[String]) -> Result<Vec<SchemaDescriptor>>;

    async fn get_schemas(&self, filter: &SchemaFilter) -> Result<Vec<SchemaDescriptor>>;

    async fn get_schemas_count(&self, filter: &SchemaFilter) -> Result<usize>;

    /// Insert (no `id`) or replace (with `id`) a schema, returning its store id
    async fn save_schema(&self, descriptor: &SchemaDescriptor) -> Result<String>;

    async fn delete_schema(&self, id: &str) -> Result<()>;

    async fn get_tools(&self, filter: &ModuleFilter) -> Result<Vec<ModuleRecord>>;

    async fn get_tool(&self, filter: &ModuleFilter) -> Result<Option<ModuleRecord>>;

    async fn get_policy(&self, filter: &ModuleFilter) -> Result<Option<ModuleRecord>>;
}

/// Persistence of imported tags
#[async_trait]
pub trait TagStore: Send + Sync + Debug {
    async fn save_tags(&self, tags: Vec<TagRecord>) -> Result<()>;
}

/// Resolves the ledger account of an importing user
#[async_trait]
pub trait AccountResolver: Send + Sync + Debug {
    async fn resolve_account(&self, owner: &Owner) -> Result<Account>;
}

/// Progress reporting at pipeline stage boundaries
pub trait Notifier: Send + Sync {
    fn start(&self, label: &str);
    fn completed_and_start(&self, label: &str);
    fn info(&self, message: &str);
    fn completed(&self);
    fn error(&self, error: &str);
}

/// Forwards progress to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn start(&self, label: &str) {
        info!(stage = label, "started");
    }

    fn completed_and_start(&self, label: &str) {
        info!(stage = label, "previous stage completed, started");
    }

    fn info(&self, message: &str) {
        info!("{}", message);
    }

    fn completed(&self) {
        info!("completed");
    }

    fn error(&self, err: &str) {
        error!(error = err, "failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_message_round_trip() {
        let mut d = SchemaDescriptor::new("u1", "Sensor", json!({ "$id": "#u1" }));
        d.id = Some("12".into());
        d.version = "1.0.0".into();

        let mut message = RawMessage::schema(MessageAction::PublishSchema, &d).unwrap();
        assert!(message.payload.get("id").is_none());
        message.id = "1.1".into();
        message.topic_id = "0.0.7".into();

        let loaded = message.to_schema().unwrap();
        assert_eq!(loaded.id, None);
        assert_eq!(loaded.message_id.as_deref(), Some("1.1"));
        assert_eq!(loaded.topic_id.as_deref(), Some("0.0.7"));
        assert_eq!(loaded.status, SchemaStatus::Published);
        assert_eq!(loaded.iri.as_deref(), Some("#u1"));
        assert_eq!(loaded.version, "1.0.0");
    }

    #[test]
    fn test_tag_message_is_not_a_schema() {
        let tag = TagMessage {
            uuid: "t1".into(),
            name: "audit".into(),
            target: "1.1".into(),
            ..Default::default()
        };
        let message = RawMessage::tag(&tag).unwrap();
        assert!(matches!(message.to_schema(), Err(ImportError::InvalidFormat(_))));
        assert_eq!(message.to_tag().unwrap(), tag);
    }

    #[test]
    fn test_conflict_filter_excludes_own_identity() {
        let mut own = SchemaDescriptor::new("u1", "A", json!({}));
        own.topic_id = Some("T1".into());
        let filter = SchemaFilter::conflicts_with(&own);
        assert!(!filter.matches(&own));

        let mut other_topic = own.clone();
        other_topic.topic_id = Some("T2".into());
        assert!(filter.matches(&other_topic));

        let mut other_iri = own.clone();
        other_iri.uuid = "u2".into();
        other_iri.update_iri();
        assert!(!filter.matches(&other_iri));
    }

    #[test]
    fn test_module_filter() {
        let tool = ModuleRecord {
            id: "1".into(),
            name: "tool".into(),
            topic_id: "0.0.9".into(),
            status: ModuleStatus::Published,
        };
        assert!(ModuleFilter::published().matches(&tool));
        assert!(ModuleFilter::by_topic("0.0.9").matches(&tool));
        assert!(!ModuleFilter::by_topic("0.0.1").matches(&tool));
    }
}
