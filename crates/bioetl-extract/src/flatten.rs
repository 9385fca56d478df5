//! Response flattening: long-format explosion of nested arrays.
//!
//! Each source item becomes one parent record plus one record per element
//! of every declared nested array (`row_subtype` marks the element class,
//! `row_index` its zero-based position in source order). Selecting only the
//! first element of a nested array is a contract violation: all elements
//! are preserved. Nested scalars not covered by a declared column land in
//! the JSON audit column.

use serde_json::Value as Json;

use bioetl_record::{Record, Value};

/// One nested array to explode.
#[derive(Debug, Clone)]
pub struct ChildArraySpec {
    /// Field on the parent item holding the array.
    pub field: String,
    /// `row_subtype` for the exploded records.
    pub subtype: String,
}

/// Flattening instructions for one source's items.
#[derive(Debug, Clone)]
pub struct FlattenSpec {
    /// Field carrying the source-side identifier (e.g. `activity_id`).
    pub id_field: String,
    /// `row_subtype` of the parent record.
    pub parent_subtype: String,
    /// Nested arrays with semantic identity, exploded to long format.
    pub child_arrays: Vec<ChildArraySpec>,
    /// Predeclared scalar columns lifted from the item (dotted paths allowed).
    pub scalar_fields: Vec<String>,
    /// Column receiving undeclared nested scalars, as a JSON tree.
    pub audit_field: String,
}

impl FlattenSpec {
    /// The flattening used for the primary bioactivity resource.
    #[must_use]
    pub fn activity() -> Self {
        Self {
            id_field: "activity_id".into(),
            parent_subtype: "activity".into(),
            child_arrays: vec![ChildArraySpec {
                field: "activity_properties".into(),
                subtype: "param".into(),
            }],
            scalar_fields: vec![
                "activity_id".into(),
                "molecule_chembl_id".into(),
                "target_chembl_id".into(),
                "assay_chembl_id".into(),
                "document_chembl_id".into(),
                "doi".into(),
                "journal".into(),
                "year".into(),
                "standard_type".into(),
                "standard_relation".into(),
                "standard_value".into(),
                "standard_units".into(),
                "pchembl_value".into(),
                "canonical_smiles".into(),
                "activity_comment".into(),
                "data_validity_comment".into(),
            ],
            audit_field: "audit_trail".into(),
        }
    }
}

/// Flatten one source item into records.
///
/// The parent record gets `record_id = "{id}:{parent_subtype}:0"`; each
/// child of array `a` gets `"{id}:{a.subtype}:{index}"`. Children inherit
/// the parent's lifted scalars and then overlay their own fields onto the
/// declared columns (a parameter's `standard_type` replaces the parent's).
#[must_use]
pub fn flatten_item(item: &Json, spec: &FlattenSpec, source: &str, run_id: &str) -> Vec<Record> {
    let id = lookup(item, &spec.id_field)
        .map(json_display)
        .unwrap_or_else(|| "unknown".to_string());

    let mut parent = Record::new();
    let mut audit = serde_json::Map::new();

    for field in &spec.scalar_fields {
        let column = field.rsplit('.').next().unwrap_or(field.as_str()).to_string();
        match lookup(item, field) {
            Some(value) if value.is_array() || value.is_object() => {
                audit.insert(column.clone(), value.clone());
                parent.set(column, Value::Null);
            }
            Some(value) => parent.set(column, Value::from_json(value)),
            None => parent.set(column, Value::Null),
        }
    }

    // Undeclared scalar leftovers are preserved in the audit column rather
    // than dropped silently.
    if let Json::Object(map) = item {
        for (key, value) in map {
            let declared = spec.scalar_fields.iter().any(|f| f == key)
                || spec.child_arrays.iter().any(|c| &c.field == key);
            if !declared && !value.is_null() {
                audit.insert(key.clone(), value.clone());
            }
        }
    }

    parent.set(
        "record_id",
        Value::Str(format!("{id}:{}:0", spec.parent_subtype)),
    );
    parent.set("row_subtype", Value::Str(spec.parent_subtype.clone()));
    parent.set("row_index", Value::Int(0));
    parent.set("source_system", Value::Str(source.to_string()));
    parent.set("run_id", Value::Str(run_id.to_string()));
    if audit.is_empty() {
        parent.set(spec.audit_field.clone(), Value::Null);
    } else {
        parent.set(spec.audit_field.clone(), Value::Json(Json::Object(audit)));
    }

    let mut records = vec![parent.clone()];

    for child_spec in &spec.child_arrays {
        let Some(elements) = item.get(child_spec.field.as_str()).and_then(Json::as_array) else {
            continue;
        };
        for (index, element) in elements.iter().enumerate() {
            let mut child = parent.clone();
            child.set(
                "record_id",
                Value::Str(format!("{id}:{}:{index}", child_spec.subtype)),
            );
            child.set("row_subtype", Value::Str(child_spec.subtype.clone()));
            child.set("row_index", Value::Int(index as i64));

            let mut child_audit = serde_json::Map::new();
            if let Json::Object(map) = element {
                for (key, value) in map {
                    let declared = spec
                        .scalar_fields
                        .iter()
                        .any(|f| f.rsplit('.').next().unwrap_or(f.as_str()) == key);
                    if declared && !value.is_array() && !value.is_object() {
                        child.set(key.clone(), Value::from_json(value));
                    } else if !value.is_null() {
                        child_audit.insert(key.clone(), value.clone());
                    }
                }
            }
            if child_audit.is_empty() {
                child.set(spec.audit_field.clone(), Value::Null);
            } else {
                child.set(
                    spec.audit_field.clone(),
                    Value::Json(Json::Object(child_audit)),
                );
            }
            records.push(child);
        }
    }

    records
}

fn lookup<'a>(item: &'a Json, path: &str) -> Option<&'a Json> {
    let mut cursor = item;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    if cursor.is_null() {
        None
    } else {
        Some(cursor)
    }
}

fn json_display(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}
