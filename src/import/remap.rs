//! Identifier remapping
//!
//! Every schema entering the store gets a new identity (or keeps its uuid when
//! ids are not regenerated). The old → new table is recorded in a
//! [`SchemaMapping`] and applied to every document and context in the batch.

use std::collections::HashMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::document::{convert_document, def_documents, set_document_id, IdRewriter, CURRENT_CODE_VERSION};
use crate::error::Result;
use crate::schema::{
    iri_for, uuid_from_iri, ImportMode, ImportOptions, ImportSchemaMap, Owner, SchemaDescriptor,
    SchemaMapping, SchemaStatus,
};

/// A schema of the batch together with its mapping key
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub key: String,
    pub descriptor: SchemaDescriptor,
}

/// Assigns new identities and rewrites references to the old ones
#[derive(Debug, Default)]
pub struct IdentifierRemapper {
    mapping: SchemaMapping,
    id_map: HashMap<String, String>,
    external: HashMap<String, String>,
}

impl IdentifierRemapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Title → IRI of schemas that are referenced but never part of a batch
    pub fn with_external_schemas<I, K, V>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.external
            .extend(schemas.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn mapping(&self) -> &SchemaMapping {
        &self.mapping
    }

    pub fn into_mapping(self) -> SchemaMapping {
        self.mapping
    }

    /// Give a schema its new identity and record the change.
    ///
    /// Returns the key of the mapping entry.
    pub fn update_id(&mut self, descriptor: &mut SchemaDescriptor, generate_new_id: bool) -> String {
        let old_uuid = descriptor
            .iri
            .as_deref()
            .and_then(uuid_from_iri)
            .map(str::to_string)
            .or_else(|| Some(descriptor.uuid.clone()).filter(|u| !u.is_empty()));

        let new_uuid = match &old_uuid {
            Some(old) if !generate_new_id => old.clone(),
            _ => Uuid::new_v4().to_string(),
        };

        let key = self.mapping.push(ImportSchemaMap {
            old_id: descriptor.id.clone(),
            new_id: None,
            old_uuid: old_uuid.clone(),
            new_uuid: Some(new_uuid.clone()),
            old_iri: old_uuid.as_deref().map(iri_for),
            new_iri: Some(iri_for(&new_uuid)),
            old_message_id: descriptor.message_id.clone(),
            new_message_id: None,
            ..Default::default()
        });
        if let Some(old) = old_uuid {
            self.id_map.insert(old, new_uuid.clone());
        }

        descriptor.uuid = new_uuid;
        descriptor.message_id = None;
        descriptor.update_iri();
        descriptor.document_url = None;
        descriptor.context_url = Some(format!("schema:{}", descriptor.uuid));
        descriptor.id = None;
        key
    }

    /// Remap and stamp every schema of the batch as a new local schema
    pub fn data_preparation(
        &mut self,
        schemas: Vec<SchemaDescriptor>,
        owner: &Owner,
        options: &ImportOptions,
        system: bool,
    ) -> Vec<BatchItem> {
        let topic_id = options.effective_topic();
        let status = match options.mode {
            ImportMode::Demo => SchemaStatus::Demo,
            ImportMode::Common => SchemaStatus::Draft,
        };

        let mut items = Vec::with_capacity(schemas.len());
        for mut descriptor in schemas {
            let key = self.update_id(&mut descriptor, !options.skip_generate_id);
            descriptor.category = options.category;
            descriptor.readonly = system;
            descriptor.system = false;
            descriptor.creator = Some(owner.creator.clone());
            descriptor.owner = Some(owner.owner.clone());
            descriptor.topic_id = Some(topic_id.clone());
            descriptor.status = status;
            descriptor.errors.clear();
            descriptor.hash = None;
            descriptor.new_versions.clear();
            if let Some(document) = descriptor.document.as_mut() {
                convert_document(document);
            }
            descriptor.code_version = Some(CURRENT_CODE_VERSION.to_string());

            self.map_external_defs(&descriptor);
            items.push(BatchItem { key, descriptor });
        }
        debug!(count = items.len(), topic_id = %topic_id, "batch prepared");
        items
    }

    fn map_external_defs(&mut self, descriptor: &SchemaDescriptor) {
        let Some(document) = &descriptor.document else {
            return;
        };
        for def in def_documents(document) {
            let Some(def_id) = def.get("$id").and_then(Value::as_str) else {
                continue;
            };
            if self.id_map.contains_key(def_id) {
                continue;
            }
            let external = def
                .get("title")
                .and_then(Value::as_str)
                .and_then(|title| self.external.get(title));
            if let Some(iri) = external {
                debug!(def_id, iri = %iri, "mapping definition to external schema");
                self.id_map.insert(def_id.to_string(), iri.clone());
            }
        }
    }

    /// Rewrite old identifiers in every document and context, and start a
    /// fresh version lineage
    pub fn update_uuids(&self, items: &mut [BatchItem]) -> Result<()> {
        let rewriter = IdRewriter::new(&self.id_map)?;
        for item in items.iter_mut() {
            let descriptor = &mut item.descriptor;
            if let Some(document) = &descriptor.document {
                let mut rewritten = rewriter.rewrite(document);
                if let Some(iri) = &descriptor.iri {
                    set_document_id(&mut rewritten, iri);
                }
                descriptor.document = Some(rewritten);
            }
            if let Some(context) = &descriptor.context {
                descriptor.context = Some(rewriter.rewrite(context));
            }
            descriptor.source_version = Some(descriptor.version.clone()).filter(|v| !v.is_empty());
            descriptor.version = String::new();
        }
        Ok(())
    }
}
