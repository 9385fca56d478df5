//! Multi-source merge with field-level precedence, whitelisting, conflict
//! detection, and audit trail.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use tracing::warn;

use bioetl_record::{Dataset, Record, Value};
use bioetl_schema::Schema;
use bioetl_util::error::{ConfigError, EtlError};

use crate::normalize::apply_normalizer;

/// How the merge behaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Undeclared enrichment fields are a hard error instead of a warning.
    pub strict_enrichment: bool,
}

/// Merge instructions assembled by the pipeline from configuration.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    /// Name of the primary source (participates in precedence).
    pub primary_source: String,
    /// Per output field: ordered source names, first non-empty wins.
    pub precedence: BTreeMap<String, Vec<String>>,
    /// Per enrichment source: fields allowed into the merged dataset.
    pub whitelists: BTreeMap<String, Vec<String>>,
    /// Per enrichment source: the join column on the primary dataset.
    pub join_keys: BTreeMap<String, String>,
}

/// Result accounting for the merge pass.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub conflicts: usize,
    pub warnings: Vec<String>,
}

/// Merge enrichment datasets onto the primary dataset in place.
///
/// For every field in the precedence matrix the engine walks the ordered
/// source list and takes the first non-null, non-empty value, recording the
/// winner in `<field>_source`. When two or more sources contribute
/// non-equal values the `conflict_<field>` flag is set and the full set of
/// source-value pairs lands in the `audit_trail` column under `conflicts`.
///
/// # Errors
///
/// `ConfigError::UnknownKey` when a non-whitelisted enrichment field
/// arrives and strict enrichment is on.
pub fn merge_enrichment(
    primary: &mut Dataset,
    enrichment: &BTreeMap<String, Dataset>,
    schema: &Schema,
    plan: &MergePlan,
    opts: MergeOptions,
) -> Result<MergeOutcome, EtlError> {
    let mut outcome = MergeOutcome::default();

    // Whitelist filter: enrichment columns beyond the declared set (plus
    // the join key) either fail the run or are dropped with a warning.
    let mut filtered: BTreeMap<&str, BTreeMap<String, Record>> = BTreeMap::new();
    for (source, dataset) in enrichment {
        let whitelist = plan.whitelists.get(source).cloned().unwrap_or_default();
        let join_key = plan
            .join_keys
            .get(source)
            .cloned()
            .unwrap_or_else(|| schema.primary_key.clone());

        for column in dataset.columns() {
            if column != &join_key && !whitelist.contains(column) {
                if opts.strict_enrichment {
                    return Err(EtlError::Config(ConfigError::UnknownKey {
                        key: format!("{source}.{column}"),
                    }));
                }
                let message =
                    format!("enrichment source '{source}' sent undeclared field '{column}', ignoring");
                warn!("{message}");
                outcome.warnings.push(message);
            }
        }

        let mut by_key: BTreeMap<String, Record> = BTreeMap::new();
        for row in dataset.rows() {
            let Some(key) = non_empty_display(row.get(&join_key)) else {
                continue;
            };
            let mut kept = Record::new();
            for field in &whitelist {
                kept.set(field.clone(), row.get(field).clone());
            }
            if by_key.insert(key.clone(), kept).is_some() {
                outcome.warnings.push(format!(
                    "enrichment source '{source}' sent duplicate join key '{key}', keeping the last"
                ));
            }
        }
        filtered.insert(source.as_str(), by_key);
    }

    // Field-level precedence walk per primary row.
    for row in primary.rows_mut() {
        for (field, source_order) in &plan.precedence {
            let mut contributions: BTreeMap<String, Value> = BTreeMap::new();
            for source in source_order {
                let candidate = if source == &plan.primary_source {
                    row.get(field).clone()
                } else {
                    let join_key = plan
                        .join_keys
                        .get(source)
                        .cloned()
                        .unwrap_or_else(|| schema.primary_key.clone());
                    match non_empty_display(row.get(&join_key)) {
                        Some(key) => filtered
                            .get(source.as_str())
                            .and_then(|m| m.get(&key))
                            .map(|r| r.get(field).clone())
                            .unwrap_or(Value::Null),
                        None => Value::Null,
                    }
                };
                let candidate = normalized_for(schema, field, candidate)?;
                if !candidate.is_absent() {
                    contributions.insert(source.clone(), candidate);
                }
            }

            // First source in precedence order with a value wins.
            let winner = source_order
                .iter()
                .find(|s| contributions.contains_key(*s));

            match winner {
                Some(source) => {
                    row.set(field.clone(), contributions[source].clone());
                    row.set(format!("{field}_source"), Value::Str(source.clone()));
                }
                None => {
                    row.set(field.clone(), Value::Null);
                    row.set(format!("{field}_source"), Value::Null);
                }
            }

            let distinct: Vec<&Value> = {
                let mut seen: Vec<&Value> = Vec::new();
                for value in contributions.values() {
                    if !seen.iter().any(|v| values_equal(v, value)) {
                        seen.push(value);
                    }
                }
                seen
            };
            let conflicted = distinct.len() >= 2;
            row.set(format!("conflict_{field}"), Value::Bool(conflicted));
            if conflicted {
                outcome.conflicts += 1;
                append_conflict_audit(row, field, &contributions);
            }
        }
    }

    Ok(outcome)
}

/// Run a candidate value through the target column's normalizers so
/// precedence and conflict comparisons happen on canonical values.
fn normalized_for(schema: &Schema, field: &str, value: Value) -> Result<Value, EtlError> {
    let Some(spec) = schema.column(field) else {
        return Ok(value);
    };
    let mut value = value;
    for normalizer in &spec.normalizers {
        value = apply_normalizer(normalizer, value).map_err(EtlError::Config)?;
    }
    Ok(value)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Float(x), Value::Int(y)) | (Value::Int(y), Value::Float(x)) => *x == *y as f64,
        _ => a == b,
    }
}

fn non_empty_display(value: &Value) -> Option<String> {
    if value.is_absent() {
        None
    } else {
        Some(value.display())
    }
}

/// Record the full source → value set for a conflicted field under the
/// `conflicts` key of the audit trail, keys sorted by construction.
fn append_conflict_audit(row: &mut Record, field: &str, contributions: &BTreeMap<String, Value>) {
    let mut audit = match row.get("audit_trail") {
        Value::Json(Json::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };

    let mut conflicts = match audit.get("conflicts") {
        Some(Json::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };

    let mut pairs = serde_json::Map::new();
    for (source, value) in contributions {
        let rendered = match value {
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::Bool(b) => Json::from(*b),
            other => Json::String(other.display()),
        };
        pairs.insert(source.clone(), rendered);
    }
    conflicts.insert(field.to_string(), Json::Object(pairs));
    audit.insert("conflicts".to_string(), Json::Object(conflicts));
    row.set("audit_trail", Value::Json(Json::Object(audit)));
}
