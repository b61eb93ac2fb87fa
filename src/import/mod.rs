//! Schema import
//!
//! [`SchemaImporter`] runs the import pipeline:
//!
//! 1. resolve the importing account and the target topic
//! 2. (by message) load the requested schemas and their direct relationships
//! 3. assign new identities ([`IdentifierRemapper`])
//! 4. rewrite old identifiers in every document and context
//! 5. resolve `$defs` ([`DefinitionResolver`])
//! 6. commit ([`CommitPipeline`])
//! 7. (by message) import the tags of the source topics ([`TagRemapper`])
//!
//! Per-schema problems end up in [`ImportResult::errors`]; anything else
//! aborts the run and is returned as an [`ImportError`](crate::error::ImportError).

pub mod commit;
pub mod defs;
pub mod remap;
pub mod tags;

pub use commit::CommitPipeline;
pub use defs::{DefinitionResolver, ResolvedSchema, INVALID_DEFS};
pub use remap::{BatchItem, IdentifierRemapper};
pub use tags::TagRemapper;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::SchemaCache;
use crate::error::Result;
use crate::export::SchemaExporter;
use crate::loader::{MessageLoader, RelationshipResolver};
use crate::schema::{ImportOptions, ImportResult, Owner, SchemaCategory, SchemaDescriptor, SchemaIssue};
use crate::services::{
    AccountResolver, DocumentStore, MessageLog, ModuleFilter, Notifier, SchemaFilter, TagStore,
};

/// How definitions are handled for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefsMode {
    /// Resolve and validate every reference
    Validate,
    /// Trust the documents as they are (system schemas)
    Trust,
}

/// Entry points for importing, previewing and exporting schemas
#[derive(Debug, Clone)]
pub struct SchemaImporter {
    log: Arc<dyn MessageLog>,
    store: Arc<dyn DocumentStore>,
    tags: Arc<dyn TagStore>,
    accounts: Arc<dyn AccountResolver>,
    loader: MessageLoader,
    external_schemas: HashMap<String, String>,
}

impl SchemaImporter {
    pub fn new(
        log: Arc<dyn MessageLog>,
        store: Arc<dyn DocumentStore>,
        tags: Arc<dyn TagStore>,
        accounts: Arc<dyn AccountResolver>,
        cache: Arc<SchemaCache>,
    ) -> Self {
        let loader = MessageLoader::new(log.clone(), cache);
        Self {
            log,
            store,
            tags,
            accounts,
            loader,
            external_schemas: HashMap::new(),
        }
    }

    /// Title → IRI of schemas that imported `$defs` may stand in for
    pub fn with_external_schemas<I, K, V>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.external_schemas
            .extend(schemas.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn loader(&self) -> &MessageLoader {
        &self.loader
    }

    /// Import schemas read from files
    pub async fn import_by_files(
        &self,
        schemas: Vec<SchemaDescriptor>,
        owner: &Owner,
        options: &ImportOptions,
        notifier: &dyn Notifier,
    ) -> Result<ImportResult> {
        notifier.start("Import schemas");
        let result = self
            .run(Batch::Files(schemas), owner, options, DefsMode::Validate, notifier)
            .await;
        Self::finish(result, notifier)
    }

    /// Import schemas as read-only system schemas, without validating references
    pub async fn import_system(
        &self,
        schemas: Vec<SchemaDescriptor>,
        owner: &Owner,
        options: &ImportOptions,
        notifier: &dyn Notifier,
    ) -> Result<ImportResult> {
        notifier.start("Import schemas");
        let result = self
            .run(Batch::Files(schemas), owner, options, DefsMode::Trust, notifier)
            .await;
        Self::finish(result, notifier)
    }

    /// Import schemas published on the message log, with their relationships
    /// and the tags of their topics
    pub async fn import_by_message(
        &self,
        message_ids: &[String],
        owner: &Owner,
        options: &ImportOptions,
        notifier: &dyn Notifier,
    ) -> Result<ImportResult> {
        notifier.start("Import schemas");
        let result = self
            .run(Batch::Messages(message_ids), owner, options, DefsMode::Validate, notifier)
            .await;
        Self::finish(result, notifier)
    }

    /// Load schemas for display, with newer published versions attached
    pub async fn preview_by_messages(
        &self,
        message_ids: &[String],
        notifier: &dyn Notifier,
    ) -> Vec<SchemaDescriptor> {
        self.loader.prepare_schema_preview(message_ids, notifier).await
    }

    /// Stored schemas together with the definitions they use
    pub async fn export_schemas(&self, ids: &[String]) -> Result<Vec<SchemaDescriptor>> {
        SchemaExporter::new(self.store.clone()).export_schemas(ids).await
    }

    /// Category for schemas imported into `topic_id`
    pub async fn schema_category(&self, topic_id: &str) -> Result<SchemaCategory> {
        if self.store.get_tool(&ModuleFilter::by_topic(topic_id)).await?.is_some() {
            return Ok(SchemaCategory::Tool);
        }
        if self.store.get_policy(&ModuleFilter::by_topic(topic_id)).await?.is_none() {
            debug!(topic_id, "topic belongs to no tool or policy");
        }
        Ok(SchemaCategory::Policy)
    }

    fn finish(result: Result<ImportResult>, notifier: &dyn Notifier) -> Result<ImportResult> {
        match result {
            Ok(result) => {
                notifier.completed();
                Ok(result)
            }
            Err(e) => {
                error!(error = %e, "schema import failed");
                notifier.error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        batch: Batch<'_>,
        owner: &Owner,
        options: &ImportOptions,
        defs_mode: DefsMode,
        notifier: &dyn Notifier,
    ) -> Result<ImportResult> {
        notifier.start("Resolve account");
        let account = self.accounts.resolve_account(owner).await?;

        notifier.completed_and_start("Resolve topics");
        let topic_id = options.effective_topic();
        let publish_topic = options.publish_topic();
        info!(topic_id = %topic_id, publish = publish_topic.is_some(), "importing schemas");

        let (schemas, source_topics) = match batch {
            Batch::Files(schemas) => (schemas, None),
            Batch::Messages(message_ids) => {
                notifier.start("Resolve schema messages");
                let resolver = RelationshipResolver::new(self.loader.clone());
                let schemas = resolver.resolve_messages(message_ids).await?;
                let mut topics: Vec<String> = Vec::new();
                for topic in schemas.iter().filter_map(|s| s.topic_id.clone()) {
                    if !topics.contains(&topic) {
                        topics.push(topic);
                    }
                }
                (schemas, Some(topics))
            }
        };

        notifier.completed_and_start("Data preparation");
        notifier.info(&format!("Found {} schemas", schemas.len()));
        let mut remapper = IdentifierRemapper::new().with_external_schemas(self.external_schemas.clone());
        let mut items =
            remapper.data_preparation(schemas, owner, options, defs_mode == DefsMode::Trust);

        notifier.completed_and_start("Update UUIDs");
        remapper.update_uuids(&mut items)?;

        let mut errors = Vec::new();
        let mut resolver = DefinitionResolver::new();
        match defs_mode {
            DefsMode::Validate => {
                notifier.completed_and_start("Validate defs");
                let tool_schemas = self.published_tool_schemas().await?;
                resolver.add_candidates(items.iter().map(|i| &i.descriptor));
                resolver.add_candidates(&tool_schemas);
                for item in &items {
                    if let Some(error) = resolver.validate_defs(item.descriptor.iri_str()) {
                        errors.push(SchemaIssue::schema(&item.descriptor, error));
                    }
                }
            }
            DefsMode::Trust => {
                notifier.completed_and_start("Update defs");
                for item in &items {
                    if let (Some(iri), Some(document)) = (&item.descriptor.iri, &item.descriptor.document) {
                        resolver.register_resolved(iri, document.clone());
                    }
                }
            }
        }

        notifier.completed_and_start("Save schemas");
        let mut mapping = remapper.into_mapping();
        CommitPipeline::new(self.store.as_ref(), self.log.as_ref(), &account, owner)
            .publish_to(publish_topic)
            .rollback_on_failure(options.rollback_on_failure)
            .save_schemas(&mut items, &resolver, &mut mapping, notifier)
            .await?;

        if let Some(topics) = source_topics {
            notifier.completed_and_start("Load tags");
            TagRemapper::new(self.log.as_ref(), self.tags.as_ref())
                .import_tags(&topics, &mapping.committed_ids())
                .await?;
        }

        info!(schemas = mapping.len(), errors = errors.len(), "schema import finished");
        Ok(ImportResult {
            schemas_map: mapping.into_entries(),
            errors,
        })
    }

    async fn published_tool_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        let tools = self.store.get_tools(&ModuleFilter::published()).await?;
        if tools.is_empty() {
            return Ok(Vec::new());
        }
        let topics = tools.into_iter().map(|t| t.topic_id).collect();
        self.store.get_schemas(&SchemaFilter::by_topics(topics)).await
    }
}

enum Batch<'a> {
    Files(Vec<SchemaDescriptor>),
    Messages(&'a [String]),
}
