//! Batch commit
//!
//! Schemas are committed one at a time in batch order. A hard error stops the
//! batch; schemas committed before it stay committed unless compensation is
//! enabled, in which case they are deleted again in reverse order.

use tracing::{debug, error, info, warn};

use crate::checksum::Checksum;
use crate::document::{check_errors, has_self_def, parse_fields};
use crate::error::{ImportError, Result};
use crate::schema::{Owner, SchemaMapping, SchemaStatus};
use crate::services::{Account, DocumentStore, MessageAction, MessageLog, Notifier, RawMessage, SchemaFilter};

use super::defs::DefinitionResolver;
use super::remap::BatchItem;

/// Persists a prepared and resolved batch
pub struct CommitPipeline<'a> {
    store: &'a dyn DocumentStore,
    log: &'a dyn MessageLog,
    account: &'a Account,
    owner: &'a Owner,
    publish_topic: Option<String>,
    rollback_on_failure: bool,
}

impl<'a> CommitPipeline<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        log: &'a dyn MessageLog,
        account: &'a Account,
        owner: &'a Owner,
    ) -> Self {
        Self {
            store,
            log,
            account,
            owner,
            publish_topic: None,
            rollback_on_failure: false,
        }
    }

    /// Publish a creation message to `topic` before each schema is saved
    pub fn publish_to(mut self, topic: Option<String>) -> Self {
        self.publish_topic = topic;
        self
    }

    pub fn rollback_on_failure(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }

    /// Commit every item, writing store ids (and published message ids) back
    /// into `mapping`
    pub async fn save_schemas(
        &self,
        items: &mut [BatchItem],
        resolver: &DefinitionResolver,
        mapping: &mut SchemaMapping,
        notifier: &dyn Notifier,
    ) -> Result<()> {
        let mut committed: Vec<(String, String)> = Vec::new();

        for (index, item) in items.iter_mut().enumerate() {
            let label = format!("Schema {} ({})", index + 1, item.descriptor.label());
            match self.save_schema(item, resolver, mapping, notifier, &label).await {
                Ok(id) => committed.push((item.key.clone(), id)),
                Err(e) => {
                    error!(schema = %label, error = %e, "commit failed");
                    if self.rollback_on_failure {
                        self.compensate(&committed, mapping, notifier).await;
                    }
                    return Err(e);
                }
            }
        }

        info!(count = committed.len(), "schemas committed");
        Ok(())
    }

    async fn save_schema(
        &self,
        item: &mut BatchItem,
        resolver: &DefinitionResolver,
        mapping: &mut SchemaMapping,
        notifier: &dyn Notifier,
        label: &str,
    ) -> Result<String> {
        let descriptor = &mut item.descriptor;
        let iri = descriptor.iri_str().to_string();

        let errors = match resolver.resolved(&iri) {
            Some(resolved) => {
                descriptor.document = Some(resolved.document.clone());
                resolved.errors.clone()
            }
            None => descriptor
                .document
                .as_ref()
                .map(|d| check_errors(&parse_fields(d)))
                .unwrap_or_default(),
        };

        let self_defined = descriptor.document.as_ref().map(has_self_def).unwrap_or(false);
        if self_defined || resolver.cycle_through(&iri).is_some() {
            return Err(ImportError::CircularDependency { iri });
        }

        if !errors.is_empty() {
            descriptor.status = SchemaStatus::Error;
        }
        descriptor.errors = errors;
        descriptor.hash = Some(Checksum::of_document(descriptor.document.as_ref()).to_string());

        let conflicts = self
            .store
            .get_schemas_count(&SchemaFilter::conflicts_with(descriptor))
            .await?;
        if conflicts > 0 {
            return Err(ImportError::IdentifierExists { iri });
        }

        if let Some(topic) = &self.publish_topic {
            notifier.info(&format!("{}: Publish", label));
            let message = RawMessage::schema(MessageAction::CreateSchema, descriptor)?;
            let message_id = self
                .log
                .send_message(topic, message, self.account, self.owner.id.as_deref())
                .await?;
            debug!(iri = %iri, message_id = %message_id, "creation message published");
            descriptor.message_id = Some(message_id.clone());
            if let Some(entry) = mapping.get_mut(&item.key) {
                entry.new_message_id = Some(message_id);
            }
        }

        notifier.info(&format!("{}: Save", label));
        let id = self.store.save_schema(descriptor).await?;
        descriptor.id = Some(id.clone());
        match mapping.get_mut(&item.key) {
            Some(entry) => entry.new_id = Some(id.clone()),
            None => warn!(key = %item.key, "no mapping entry for committed schema"),
        }
        notifier.info(&format!("{}: Created", label));
        Ok(id)
    }

    async fn compensate(
        &self,
        committed: &[(String, String)],
        mapping: &mut SchemaMapping,
        notifier: &dyn Notifier,
    ) {
        notifier.info(&format!("Rolling back {} schemas", committed.len()));
        for (key, id) in committed.iter().rev() {
            match self.store.delete_schema(id).await {
                Ok(()) => {
                    if let Some(entry) = mapping.get_mut(key) {
                        entry.new_id = None;
                        entry.new_message_id = None;
                    }
                }
                Err(e) => warn!(id = %id, error = %e, "rollback could not delete schema"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::remap::IdentifierRemapper;
    use crate::memory::{InMemoryMessageLog, InMemoryStore, RecordingNotifier};
    use crate::schema::{ImportOptions, SchemaCategory, SchemaDescriptor};
    use crate::services::{DocumentStore, MessageType};
    use serde_json::json;

    fn account() -> Account {
        Account {
            account_id: "0.0.1".into(),
            key: "k".into(),
        }
    }

    fn prepare(
        schemas: Vec<SchemaDescriptor>,
        options: &ImportOptions,
    ) -> (Vec<BatchItem>, SchemaMapping, DefinitionResolver) {
        let mut remapper = IdentifierRemapper::new();
        let mut items = remapper.data_preparation(schemas, &Owner::new("alice"), options, false);
        remapper.update_uuids(&mut items).unwrap();
        let mut resolver = DefinitionResolver::new();
        resolver.add_candidates(items.iter().map(|i| &i.descriptor));
        for item in &items {
            resolver.validate_defs(item.descriptor.iri_str());
        }
        (items, remapper.into_mapping(), resolver)
    }

    fn plain(uuid: &str) -> SchemaDescriptor {
        SchemaDescriptor::new(uuid, uuid, json!({ "$id": format!("#{}", uuid), "properties": {} }))
    }

    #[tokio::test]
    async fn test_commit_writes_ids_by_key() {
        let store = InMemoryStore::new();
        let log = InMemoryMessageLog::new();
        let owner = Owner::new("alice");
        let account = account();
        let options = ImportOptions::new(Some("0.0.5".into()), SchemaCategory::Policy);
        let (mut items, mut mapping, resolver) = prepare(vec![plain("a"), plain("b")], &options);

        CommitPipeline::new(&store, &log, &account, &owner)
            .publish_to(options.publish_topic())
            .save_schemas(&mut items, &resolver, &mut mapping, &RecordingNotifier::new())
            .await
            .unwrap();

        for (item, entry) in items.iter().zip(mapping.entries()) {
            assert_eq!(item.descriptor.id, entry.new_id);
            assert_eq!(item.descriptor.message_id, entry.new_message_id);
            assert!(item.descriptor.hash.is_some());
        }
        let published = log
            .get_messages("0.0.5", MessageType::Schema, MessageAction::CreateSchema)
            .await
            .unwrap();
        assert_eq!(published.len(), 2);
    }

    #[tokio::test]
    async fn test_self_definition_is_fatal() {
        let store = InMemoryStore::new();
        let log = InMemoryMessageLog::new();
        let owner = Owner::new("alice");
        let account = account();
        let options = ImportOptions::default();
        let mut remapper = IdentifierRemapper::new();
        let mut items = remapper.data_preparation(vec![plain("a")], &owner, &options, false);
        remapper.update_uuids(&mut items).unwrap();
        let iri = items[0].descriptor.iri.clone().unwrap();
        let mut document = items[0].descriptor.document.clone().unwrap();
        let mut defs = serde_json::Map::new();
        defs.insert(iri.clone(), json!({}));
        document["$defs"] = serde_json::Value::Object(defs);

        let mut resolver = DefinitionResolver::new();
        resolver.register_resolved(&iri, document);
        let mut mapping = remapper.into_mapping();

        let err = CommitPipeline::new(&store, &log, &account, &owner)
            .save_schemas(&mut items, &resolver, &mut mapping, &RecordingNotifier::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::CircularDependency { .. }));
        assert!(store.schemas().await.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_deletes_committed_rows() {
        let store = InMemoryStore::new();
        let log = InMemoryMessageLog::new();
        let owner = Owner::new("alice");
        let account = account();

        let mut existing = plain("b");
        existing.topic_id = Some("0.0.other".into());
        store.save_schema(&existing).await.unwrap();

        let mut options = ImportOptions::new(Some("0.0.5".into()), SchemaCategory::Policy);
        options.skip_generate_id = true;
        options.mode = crate::schema::ImportMode::Demo;
        let (mut items, mut mapping, resolver) = prepare(vec![plain("a"), plain("b")], &options);

        let err = CommitPipeline::new(&store, &log, &account, &owner)
            .rollback_on_failure(true)
            .save_schemas(&mut items, &resolver, &mut mapping, &RecordingNotifier::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Schema identifier already exist");
        assert_eq!(store.schemas().await.len(), 1);
        assert!(mapping.entries().iter().all(|e| e.new_id.is_none()));
    }

    #[tokio::test]
    async fn test_rollback_clears_published_message_ids() {
        let store = InMemoryStore::new();
        let log = InMemoryMessageLog::new();
        let owner = Owner::new("alice");
        let account = account();

        let mut existing = plain("b");
        existing.topic_id = Some("0.0.other".into());
        store.save_schema(&existing).await.unwrap();

        let mut options = ImportOptions::new(Some("0.0.5".into()), SchemaCategory::Policy);
        options.skip_generate_id = true;
        let (mut items, mut mapping, resolver) = prepare(vec![plain("a"), plain("b")], &options);

        let err = CommitPipeline::new(&store, &log, &account, &owner)
            .publish_to(options.publish_topic())
            .rollback_on_failure(true)
            .save_schemas(&mut items, &resolver, &mut mapping, &RecordingNotifier::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::IdentifierExists { .. }));
        assert_eq!(store.schemas().await.len(), 1);
        let published = log
            .get_messages("0.0.5", MessageType::Schema, MessageAction::CreateSchema)
            .await
            .unwrap();
        assert_eq!(published.len(), 1);
        assert!(mapping
            .entries()
            .iter()
            .all(|e| e.new_id.is_none() && e.new_message_id.is_none()));
    }
}
