//! Loading schemas from the message log
//!
//! [`MessageLoader`] turns log messages into descriptors through the shared
//! [`SchemaCache`]. [`RelationshipResolver`] assembles an import batch from a
//! set of requested message ids.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::SchemaCache;
use crate::error::{ImportError, Result};
use crate::schema::{SchemaDescriptor, VersionHint};
use crate::services::{MessageAction, MessageLog, MessageType, Notifier};
use crate::version::{is_newer, parse_version};

/// Loads schema descriptors from the message log
#[derive(Debug, Clone)]
pub struct MessageLoader {
    log: Arc<dyn MessageLog>,
    cache: Arc<SchemaCache>,
}

impl MessageLoader {
    pub fn new(log: Arc<dyn MessageLog>, cache: Arc<SchemaCache>) -> Self {
        Self { log, cache }
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    /// Load one schema message, consulting the cache first
    pub async fn load_schema(&self, message_id: &str) -> Result<SchemaDescriptor> {
        if let Some(descriptor) = self.cache.get(message_id) {
            debug!(message_id, "schema cache hit");
            return Ok(descriptor);
        }

        let message = self
            .log
            .get_message(message_id, MessageType::Schema)
            .await
            .map_err(|e| {
                error!(message_id, error = %e, "cannot load schema");
                ImportError::SchemaLoad {
                    message_id: message_id.to_string(),
                }
            })?;

        let descriptor = message.to_schema().map_err(|e| {
            error!(message_id, error = %e, "cannot decode schema message");
            ImportError::SchemaLoad {
                message_id: message_id.to_string(),
            }
        })?;

        self.cache.set(message_id, &descriptor);
        Ok(descriptor)
    }

    /// Every schema version published under a topic, in log order
    pub async fn load_topic_schemas(&self, topic_id: &str) -> Result<Vec<SchemaDescriptor>> {
        let messages = self
            .log
            .get_messages(topic_id, MessageType::Schema, MessageAction::PublishSchema)
            .await?;

        let mut schemas = Vec::with_capacity(messages.len());
        for message in messages {
            match message.to_schema() {
                Ok(descriptor) => {
                    self.cache.set(&message.id, &descriptor);
                    schemas.push(descriptor);
                }
                Err(e) => {
                    warn!(message_id = %message.id, topic_id, error = %e, "skipping unreadable schema message");
                }
            }
        }
        Ok(schemas)
    }

    /// Load schemas for display and attach newer published versions.
    ///
    /// Never fails: per-item failures go to the notifier and the item is left
    /// out of the result.
    pub async fn prepare_schema_preview(
        &self,
        message_ids: &[String],
        notifier: &dyn Notifier,
    ) -> Vec<SchemaDescriptor> {
        notifier.start("Load schema files");
        let mut schemas = Vec::with_capacity(message_ids.len());
        for message_id in message_ids {
            match self.load_schema(message_id).await {
                Ok(descriptor) => schemas.push(descriptor),
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "preview skipped schema");
                    notifier.error(&e.to_string());
                }
            }
        }

        notifier.completed_and_start("Parse schema");
        let mut seen = HashSet::new();
        let topics: Vec<String> = schemas
            .iter()
            .filter_map(|s| s.topic_id.clone())
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let mut published = Vec::new();
        for topic_id in &topics {
            match self.load_topic_schemas(topic_id).await {
                Ok(mut versions) => published.append(&mut versions),
                Err(e) => {
                    warn!(topic_id = %topic_id, error = %e, "cannot load topic history");
                    notifier.error(&e.to_string());
                }
            }
        }

        for schema in &mut schemas {
            if parse_version(&schema.version).is_none() {
                continue;
            }
            let mut newer: Vec<VersionHint> = published
                .iter()
                .filter(|p| p.uuid == schema.uuid && is_newer(&p.version, &schema.version))
                .map(|p| VersionHint {
                    message_id: p.message_id.clone(),
                    version: p.version.clone(),
                    name: p.name.clone(),
                    topic_id: p.topic_id.clone(),
                })
                .collect();
            newer.reverse();
            schema.new_versions = newer;
        }

        info!(count = schemas.len(), topics = topics.len(), "schema preview prepared");
        notifier.completed();
        schemas
    }
}

/// Expands requested message ids with their declared relationships
#[derive(Debug, Clone)]
pub struct RelationshipResolver {
    loader: MessageLoader,
}

impl RelationshipResolver {
    pub fn new(loader: MessageLoader) -> Self {
        Self { loader }
    }

    /// Requested schemas followed by the schemas they declare a relationship
    /// to. Relationships of those pulled-in schemas are not followed.
    pub async fn resolve_messages(&self, message_ids: &[String]) -> Result<Vec<SchemaDescriptor>> {
        let mut schemas = Vec::new();
        let mut relationships: Vec<String> = Vec::new();

        for message_id in message_ids {
            let descriptor = self.loader.load_schema(message_id).await?;
            for related in &descriptor.relationships {
                if !relationships.contains(related) {
                    relationships.push(related.clone());
                }
            }
            schemas.push(descriptor);
        }

        relationships.retain(|id| !message_ids.contains(id));
        debug!(requested = message_ids.len(), related = relationships.len(), "resolving schema messages");

        for message_id in &relationships {
            schemas.push(self.loader.load_schema(message_id).await?);
        }
        Ok(schemas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryMessageLog, RecordingNotifier};
    use crate::services::RawMessage;
    use serde_json::json;

    fn schema(uuid: &str, version: &str, relationships: &[&str]) -> RawMessage {
        let mut d = SchemaDescriptor::new(uuid, uuid.to_uppercase(), json!({ "$id": format!("#{}", uuid) }));
        d.version = version.to_string();
        d.relationships = relationships.iter().map(|r| r.to_string()).collect();
        RawMessage::schema(MessageAction::PublishSchema, &d).unwrap()
    }

    async fn log_with(messages: Vec<(&str, &str, RawMessage)>) -> Arc<InMemoryMessageLog> {
        let log = InMemoryMessageLog::new();
        for (id, topic, message) in messages {
            log.publish_at(id, topic, message).await;
        }
        Arc::new(log)
    }

    #[tokio::test]
    async fn test_load_schema_is_cached() {
        let log = log_with(vec![("1.1", "T", schema("a", "1.0.0", &[]))]).await;
        let cache = Arc::new(SchemaCache::new());
        let loader = MessageLoader::new(log, cache.clone());

        let d = loader.load_schema("1.1").await.unwrap();
        assert_eq!(d.iri.as_deref(), Some("#a"));
        assert_eq!(d.message_id.as_deref(), Some("1.1"));
        assert!(cache.has("1.1"));

        let err = loader.load_schema("9.9").await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot load schema 9.9");
    }

    #[tokio::test]
    async fn test_relationships_expand_one_hop() {
        let log = log_with(vec![
            ("A", "T", schema("a", "1.0.0", &["B"])),
            ("B", "T", schema("b", "1.0.0", &["C"])),
            ("C", "T", schema("c", "1.0.0", &[])),
        ])
        .await;
        let resolver = RelationshipResolver::new(MessageLoader::new(log, Arc::new(SchemaCache::new())));

        let schemas = resolver.resolve_messages(&["A".to_string()]).await.unwrap();
        let uuids: Vec<&str> = schemas.iter().map(|s| s.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_requested_relationships_are_not_loaded_twice() {
        let log = log_with(vec![
            ("A", "T", schema("a", "1.0.0", &["B"])),
            ("B", "T", schema("b", "1.0.0", &["A"])),
        ])
        .await;
        let resolver = RelationshipResolver::new(MessageLoader::new(log, Arc::new(SchemaCache::new())));

        let schemas = resolver
            .resolve_messages(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert_eq!(schemas.len(), 2);
    }

    #[tokio::test]
    async fn test_preview_attaches_newer_versions() {
        let log = log_with(vec![
            ("1", "T", schema("a", "1.0.0", &[])),
            ("2", "T", schema("a", "1.1.0", &[])),
            ("3", "T", schema("a", "2.0.0", &[])),
            ("4", "T", schema("b", "", &[])),
        ])
        .await;
        let loader = MessageLoader::new(log, Arc::new(SchemaCache::new()));
        let notifier = RecordingNotifier::new();

        let ids = vec!["1".to_string(), "4".to_string(), "missing".to_string()];
        let schemas = loader.prepare_schema_preview(&ids, &notifier).await;

        assert_eq!(schemas.len(), 2);
        let versions: Vec<&str> = schemas[0].new_versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(versions, vec!["2.0.0", "1.1.0"]);
        assert_eq!(schemas[0].new_versions[0].message_id.as_deref(), Some("3"));
        assert!(schemas[1].new_versions.is_empty());
        assert!(notifier
            .events()
            .iter()
            .any(|e| e == "error: Cannot load schema missing"));
    }
}
