//! Definition resolution
//!
//! Resolves the schemas a document references and embeds them under `$defs`.
//! Candidates come from the import batch and from published tool schemas.
//! A reference that cannot be resolved is dropped from its field and the
//! field is marked invalid; the schema itself is still resolved.

use std::collections::HashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::builtin::builtin_schemas;
use crate::document::{
    check_errors, clear_field_ref, parse_fields, rebuild_defs, ref_targets, INVALID_REFERENCE,
};
use crate::refs::RefGraph;
use crate::schema::SchemaDescriptor;

/// Error returned for a schema whose references did not all resolve
pub const INVALID_DEFS: &str = "Invalid defs";

/// A schema document after definition resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSchema {
    pub document: Value,
    /// Field errors left by degraded references
    pub errors: Vec<String>,
}

/// Memoized depth-first resolver over the candidate pool
#[derive(Debug)]
pub struct DefinitionResolver {
    pool: HashMap<String, Value>,
    graph: RefGraph,
    memo: HashMap<String, ResolvedSchema>,
}

impl Default for DefinitionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionResolver {
    /// A resolver that already knows the builtin schemas
    pub fn new() -> Self {
        let memo = builtin_schemas()
            .into_iter()
            .map(|b| {
                (
                    b.iri,
                    ResolvedSchema {
                        document: b.document,
                        errors: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            pool: HashMap::new(),
            graph: RefGraph::new(),
            memo,
        }
    }

    /// Add schemas to the candidate pool; the first schema seen for an IRI wins
    pub fn add_candidates<'a>(&mut self, schemas: impl IntoIterator<Item = &'a SchemaDescriptor>) {
        for schema in schemas {
            let (Some(iri), Some(document)) = (&schema.iri, &schema.document) else {
                continue;
            };
            if self.pool.contains_key(iri) {
                continue;
            }
            self.graph.add_schema(iri, ref_targets(document));
            self.pool.insert(iri.clone(), document.clone());
        }
    }

    /// Resolve `target` and everything it references.
    ///
    /// Returns `None` on success, or the error message for `target`.
    pub fn validate_defs(&mut self, target: &str) -> Option<String> {
        if self.memo.contains_key(target) {
            return None;
        }

        let Some(mut document) = self.pool.get(target).cloned() else {
            debug!(iri = target, "definition not found");
            return Some(INVALID_DEFS.to_string());
        };

        if let Some(cycle) = self.graph.cycle_through(target) {
            warn!(iri = target, cycle = ?cycle, "circular schema reference");
            return Some(format!("There is circular dependency in schema: {}", target));
        }

        let mut fields = parse_fields(&document);
        let mut invalid = false;
        for field in fields.iter_mut().filter(|f| f.is_ref) {
            let Some(reference) = field.ty.clone() else {
                continue;
            };
            if let Some(error) = self.validate_defs(&reference) {
                debug!(iri = target, field = %field.name, location = ?field.location, reference = %reference, error = %error, "dropping reference");
                clear_field_ref(&mut document, field);
                field.is_ref = false;
                field.ty = None;
                field.errors.push(INVALID_REFERENCE.to_string());
                invalid = true;
            }
        }

        let known: HashMap<String, Value> = fields
            .iter()
            .filter(|f| f.is_ref)
            .filter_map(|f| f.ty.as_ref())
            .filter_map(|iri| Some((iri.clone(), self.memo.get(iri)?.document.clone())))
            .collect();
        rebuild_defs(&mut document, &fields, &known);

        self.memo.insert(
            target.to_string(),
            ResolvedSchema {
                document,
                errors: check_errors(&fields),
            },
        );

        invalid.then(|| INVALID_DEFS.to_string())
    }

    /// Accept a schema as resolved without validating its references
    pub fn register_resolved(&mut self, iri: &str, document: Value) {
        let errors = check_errors(&parse_fields(&document));
        self.memo
            .insert(iri.to_string(), ResolvedSchema { document, errors });
    }

    pub fn resolved(&self, iri: &str) -> Option<&ResolvedSchema> {
        self.memo.get(iri)
    }

    pub fn is_resolved(&self, iri: &str) -> bool {
        self.memo.contains_key(iri)
    }

    /// A reference cycle through `iri` among the candidates, if any
    pub fn cycle_through(&self, iri: &str) -> Option<Vec<String>> {
        self.graph.cycle_through(iri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::GEO_JSON_IRI;
    use crate::document::def_keys;
    use serde_json::json;

    fn schema(uuid: &str, refs: &[&str]) -> SchemaDescriptor {
        let mut properties: serde_json::Map<String, Value> = refs
            .iter()
            .enumerate()
            .map(|(i, r)| (format!("f{}", i), json!({ "$ref": r })))
            .collect();
        properties.insert("label".into(), json!({ "type": "string" }));
        SchemaDescriptor::new(
            uuid,
            uuid.to_uppercase(),
            json!({ "$id": format!("#{}", uuid), "type": "object", "properties": properties }),
        )
    }

    fn resolver(schemas: &[SchemaDescriptor]) -> DefinitionResolver {
        let mut resolver = DefinitionResolver::new();
        resolver.add_candidates(schemas);
        resolver
    }

    #[test]
    fn test_resolves_and_flattens_defs() {
        let batch = vec![
            schema("a", &["#b"]),
            schema("b", &["#c", GEO_JSON_IRI]),
            schema("c", &[]),
        ];
        let mut resolver = resolver(&batch);

        assert_eq!(resolver.validate_defs("#a"), None);
        let resolved = resolver.resolved("#a").unwrap();
        let mut keys = def_keys(&resolved.document);
        keys.sort();
        assert_eq!(keys, vec![GEO_JSON_IRI, "#b", "#c"]);
        assert!(resolved.errors.is_empty());
        assert!(resolver.is_resolved("#c"));
    }

    #[test]
    fn test_missing_reference_degrades_field() {
        let batch = vec![schema("a", &["#missing", "#b"]), schema("b", &[])];
        let mut resolver = resolver(&batch);

        assert_eq!(resolver.validate_defs("#a").as_deref(), Some(INVALID_DEFS));
        let resolved = resolver.resolved("#a").unwrap();
        assert!(resolved.document["properties"]["f0"].get("$ref").is_none());
        assert_eq!(resolved.document["properties"]["f1"]["$ref"], json!("#b"));
        assert_eq!(def_keys(&resolved.document), vec!["#b"]);
        assert_eq!(resolved.errors, vec!["field f0: Invalid reference"]);

        assert_eq!(resolver.validate_defs("#absent").as_deref(), Some(INVALID_DEFS));
    }

    #[test]
    fn test_cycle_terminates_with_error() {
        let batch = vec![schema("a", &["#b"]), schema("b", &["#c"]), schema("c", &["#a"])];
        let mut resolver = resolver(&batch);

        let error = resolver.validate_defs("#a").unwrap();
        assert!(error.starts_with("There is circular dependency in schema: #"));
        assert!(["#a", "#b", "#c"].iter().any(|iri| error.ends_with(iri)));

        let again = resolver.validate_defs("#a").unwrap();
        assert_eq!(error, again);
        assert!(!resolver.is_resolved("#a"));
        assert!(resolver.cycle_through("#b").is_some());
    }

    #[test]
    fn test_dependent_of_cycle_is_degraded() {
        let batch = vec![schema("d", &["#a"]), schema("a", &["#b"]), schema("b", &["#a"])];
        let mut resolver = resolver(&batch);

        assert_eq!(resolver.validate_defs("#d").as_deref(), Some(INVALID_DEFS));
        assert!(resolver.is_resolved("#d"));
        assert!(resolver.cycle_through("#d").is_none());
    }

    #[test]
    fn test_first_candidate_wins() {
        let batch = vec![schema("a", &[])];
        let mut shadow = schema("a", &["#x"]);
        shadow.name = "shadow".into();
        let mut resolver = resolver(&batch);
        resolver.add_candidates([&shadow]);

        assert_eq!(resolver.validate_defs("#a"), None);
        let resolved = resolver.resolved("#a").unwrap();
        assert!(resolved.document["properties"].get("f0").is_none());
    }

    #[test]
    fn test_condition_references_are_resolved() {
        let mut a = schema("a", &[]);
        a.document.as_mut().unwrap()["allOf"] = json!([{
            "if": { "properties": { "label": { "const": "wet" } } },
            "then": { "properties": { "gauge": { "$ref": "#b" } } },
            "else": { "properties": { "sensor": { "$ref": "#gone" } } }
        }]);
        a.document.as_mut().unwrap()["$defs"] = json!({ "#b": { "$id": "#b" } });
        let batch = vec![a, schema("b", &["#c"]), schema("c", &[])];
        let mut resolver = resolver(&batch);

        assert_eq!(resolver.validate_defs("#a").as_deref(), Some(INVALID_DEFS));
        let resolved = resolver.resolved("#a").unwrap();
        let condition = &resolved.document["allOf"][0];
        assert_eq!(condition["then"]["properties"]["gauge"]["$ref"], json!("#b"));
        assert!(condition["else"]["properties"]["sensor"].get("$ref").is_none());

        let mut keys = def_keys(&resolved.document);
        keys.sort();
        assert_eq!(keys, vec!["#b", "#c"]);
        assert_eq!(resolved.errors, vec!["field sensor: Invalid reference"]);
    }

    #[test]
    fn test_condition_cycle_is_detected() {
        let mut a = schema("a", &[]);
        a.document.as_mut().unwrap()["allOf"] = json!([{
            "then": { "properties": { "back": { "$ref": "#b" } } }
        }]);
        let batch = vec![a, schema("b", &["#a"])];
        let resolver = resolver(&batch);
        assert!(resolver.cycle_through("#a").is_some());
    }

    #[test]
    fn test_register_resolved() {
        let mut resolver = DefinitionResolver::new();
        resolver.register_resolved("#s", json!({ "$id": "#s", "properties": {} }));
        assert!(resolver.is_resolved("#s"));
        assert_eq!(resolver.validate_defs("#s"), None);
        assert!(resolver.is_resolved(GEO_JSON_IRI));
    }
}
