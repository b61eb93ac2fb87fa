//! Schema document helpers
//!
//! A schema document is a JSON Schema object whose `properties` may point at
//! other schemas with `{"$ref": "#<uuid>"}` and which carries the documents
//! of everything it references, flattened, under `$defs`. Conditions live in
//! `allOf` as `if`/`then`/`else` entries whose branches declare fields of
//! their own.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::Result;

/// Document format version produced by [`convert_document`]
pub const CURRENT_CODE_VERSION: &str = "1.0.0";

/// Error recorded on a field whose reference could not be resolved
pub const INVALID_REFERENCE: &str = "Invalid reference";

/// Where a field is declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLocation {
    /// Top-level `properties`
    Properties,
    /// `allOf[i].then.properties`
    Then(usize),
    /// `allOf[i].else.properties`
    Else(usize),
}

/// A property of a schema document or of one of its condition branches
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub location: FieldLocation,
    pub title: String,
    pub is_array: bool,
    /// The property points at another schema instead of declaring a type
    pub is_ref: bool,
    /// Target IRI for references, JSON type otherwise
    pub ty: Option<String>,
    pub required: bool,
    pub errors: Vec<String>,
}

/// Keys of `$defs`
pub fn def_keys(document: &Value) -> Vec<String> {
    document
        .get("$defs")
        .and_then(Value::as_object)
        .map(|defs| defs.keys().cloned().collect())
        .unwrap_or_default()
}

/// Documents embedded under `$defs`
pub fn def_documents(document: &Value) -> Vec<&Value> {
    document
        .get("$defs")
        .and_then(Value::as_object)
        .map(|defs| defs.values().collect())
        .unwrap_or_default()
}

/// A document that embeds itself in its own `$defs`
pub fn has_self_def(document: &Value) -> bool {
    let Some(id) = document.get("$id").and_then(Value::as_str) else {
        return false;
    };
    document
        .get("$defs")
        .and_then(Value::as_object)
        .map(|defs| defs.contains_key(id))
        .unwrap_or(false)
}

/// Set the document's `$id`
pub fn set_document_id(document: &mut Value, iri: &str) {
    if let Some(obj) = document.as_object_mut() {
        obj.insert("$id".to_string(), Value::String(iri.to_string()));
    }
}

/// Resolve the node that carries a property's type: the first `oneOf`
/// alternative, then array `items`.
fn property_type_node(property: &Value) -> (&Value, bool) {
    let mut node = property;
    if let Some(first) = node.get("oneOf").and_then(Value::as_array).and_then(|a| a.first()) {
        node = first;
    }
    let is_array = node.get("type").and_then(Value::as_str) == Some("array");
    if is_array {
        if let Some(items) = node.get("items") {
            node = items;
        }
    }
    (node, is_array)
}

fn property_type_node_mut(property: &mut Value) -> &mut Value {
    let has_one_of = property
        .get("oneOf")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    let node = if has_one_of {
        &mut property["oneOf"][0]
    } else {
        property
    };
    let is_array = node.get("type").and_then(Value::as_str) == Some("array");
    if is_array && node.get("items").is_some() {
        &mut node["items"]
    } else {
        node
    }
}

/// Parse the fields of a document: top-level properties first, then the
/// fields of every condition branch in `allOf` order
pub fn parse_fields(document: &Value) -> Vec<SchemaField> {
    let mut fields = parse_properties(document, FieldLocation::Properties);
    let conditions = document.get("allOf").and_then(Value::as_array);
    for (index, condition) in conditions.into_iter().flatten().enumerate() {
        if let Some(branch) = condition.get("then") {
            fields.extend(parse_properties(branch, FieldLocation::Then(index)));
        }
        if let Some(branch) = condition.get("else") {
            fields.extend(parse_properties(branch, FieldLocation::Else(index)));
        }
    }
    fields
}

fn parse_properties(container: &Value, location: FieldLocation) -> Vec<SchemaField> {
    let Some(properties) = container.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = container
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, property)| {
            let (node, is_array) = property_type_node(property);
            let reference = node.get("$ref").and_then(Value::as_str);
            let declared_type = node.get("type");
            let is_ref = reference.is_some() && declared_type.is_none();
            let ty = if is_ref {
                reference.map(str::to_string)
            } else {
                declared_type.and_then(Value::as_str).map(str::to_string)
            };
            let title = node
                .get("title")
                .or_else(|| property.get("title"))
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string();
            SchemaField {
                name: name.clone(),
                location,
                title,
                is_array,
                is_ref,
                ty,
                required: required.contains(&name.as_str()),
                errors: Vec::new(),
            }
        })
        .collect()
}

/// IRIs referenced by the fields of a document, conditions included
pub fn ref_targets(document: &Value) -> Vec<String> {
    parse_fields(document)
        .into_iter()
        .filter(|f| f.is_ref)
        .filter_map(|f| f.ty)
        .collect()
}

/// Drop the `$ref` of a field so it no longer links anywhere
pub fn clear_field_ref(document: &mut Value, field: &SchemaField) {
    let container = match field.location {
        FieldLocation::Properties => Some(document),
        FieldLocation::Then(index) => document
            .get_mut("allOf")
            .and_then(|c| c.get_mut(index))
            .and_then(|c| c.get_mut("then")),
        FieldLocation::Else(index) => document
            .get_mut("allOf")
            .and_then(|c| c.get_mut(index))
            .and_then(|c| c.get_mut("else")),
    };
    let Some(property) = container
        .and_then(|c| c.get_mut("properties"))
        .and_then(|p| p.get_mut(&field.name))
    else {
        return;
    };
    if let Some(node) = property_type_node_mut(property).as_object_mut() {
        node.remove("$ref");
    }
}

/// Collect validation errors of a document's fields
pub fn check_errors(fields: &[SchemaField]) -> Vec<String> {
    fields
        .iter()
        .flat_map(|field| {
            field
                .errors
                .iter()
                .map(move |error| format!("field {}: {}", field.name, error))
        })
        .collect()
}

/// Rebuild `$defs` from the fields that still carry a reference.
///
/// Every referenced document is embedded without its own `$defs`, and those
/// nested definitions are flattened into the same map.
pub fn rebuild_defs(document: &mut Value, fields: &[SchemaField], known: &HashMap<String, Value>) {
    let mut direct = Map::new();
    for field in fields.iter().filter(|f| f.is_ref) {
        let Some(target) = &field.ty else {
            continue;
        };
        if let Some(target_doc) = known.get(target) {
            direct.insert(target.clone(), target_doc.clone());
        }
    }

    let mut flattened = Map::new();
    flatten_defs(&direct, &mut flattened);

    if let Some(obj) = document.as_object_mut() {
        if flattened.is_empty() {
            obj.remove("$defs");
        } else {
            obj.insert("$defs".to_string(), Value::Object(flattened));
        }
    }
}

fn flatten_defs(defs: &Map<String, Value>, out: &mut Map<String, Value>) {
    for (iri, doc) in defs {
        if out.contains_key(iri) {
            continue;
        }
        let mut stripped = doc.clone();
        let nested = stripped
            .as_object_mut()
            .and_then(|obj| obj.remove("$defs"));
        out.insert(iri.clone(), stripped);
        if let Some(Value::Object(nested)) = nested {
            flatten_defs(&nested, out);
        }
    }
}

/// Upgrade a document to [`CURRENT_CODE_VERSION`].
///
/// Legacy `definitions` are merged into `$defs`; `type`, `properties` and
/// `required` are filled in when missing.
pub fn convert_document(document: &mut Value) {
    let Some(obj) = document.as_object_mut() else {
        return;
    };
    if let Some(Value::Object(legacy)) = obj.remove("definitions") {
        let defs = obj
            .entry("$defs")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(defs) = defs.as_object_mut() {
            for (key, value) in legacy {
                defs.entry(key).or_insert(value);
            }
        }
    }
    obj.entry("type").or_insert_with(|| Value::String("object".into()));
    obj.entry("properties").or_insert_with(|| Value::Object(Map::new()));
    obj.entry("required").or_insert_with(|| Value::Array(Vec::new()));
}

/// Find-and-replace of identifiers over a whole JSON tree.
///
/// Replacement is substring based and applies to string values and object
/// keys alike, so `"#<uuid>"` references, `$defs` keys and composite
/// strings such as `"schema:<uuid>"` are all rewritten.
#[derive(Debug, Clone)]
pub struct IdRewriter {
    pattern: Option<Regex>,
    replacements: HashMap<String, String>,
}

impl IdRewriter {
    pub fn new(replacements: &HashMap<String, String>) -> Result<Self> {
        let mut keys: Vec<&String> = replacements
            .iter()
            .filter(|(old, new)| !old.is_empty() && old != new)
            .map(|(old, _)| old)
            .collect();
        // longest first so "#abc" wins over "abc"
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let pattern = if keys.is_empty() {
            None
        } else {
            let alternation = keys
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&alternation)?)
        };

        Ok(Self {
            pattern,
            replacements: replacements.clone(),
        })
    }

    pub fn rewrite_str(&self, input: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern
                .replace_all(input, |caps: &regex::Captures| {
                    self.replacements
                        .get(&caps[0])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned(),
            None => input.to_string(),
        }
    }

    pub fn rewrite(&self, value: &Value) -> Value {
        if self.pattern.is_none() {
            return value.clone();
        }
        match value {
            Value::String(s) => Value::String(self.rewrite_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.rewrite(v)).collect()),
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (self.rewrite_str(k), self.rewrite(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
