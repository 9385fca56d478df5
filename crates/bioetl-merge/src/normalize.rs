//! The normalization catalog and dataset-level normalization pass.
//!
//! Every function here is deterministic and pure: the same input value
//! always yields the same output, with no dependence on locale or run
//! state. Normalizers are registered by name and applied in the order a
//! column's schema metadata declares.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use bioetl_record::{Dataset, Value};
use bioetl_schema::{ColumnType, Schema};
use bioetl_util::error::{ConfigError, EtlError};

static UPPER_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z]+\d+$").expect("static regex"));
static DOI: Lazy<Regex> = Lazy::new(|| Regex::new(r"^10\.\d+/.+$").expect("static regex"));

/// Apply one named normalizer to a value.
///
/// # Errors
///
/// `ConfigError::InvalidValue` for an unregistered normalizer name.
pub fn apply_normalizer(name: &str, value: Value) -> Result<Value, ConfigError> {
    match name {
        "string" => Ok(normalize_string(value)),
        "identifier" => Ok(normalize_identifier(value)),
        "smiles" => Ok(normalize_smiles(value)),
        "inchi" => Ok(normalize_inchi(value)),
        "numeric" => Ok(normalize_numeric(value)),
        "datetime" => Ok(normalize_datetime(value)),
        "boolean" => Ok(normalize_boolean(value)),
        other => Err(ConfigError::InvalidValue {
            key: "normalizers".into(),
            reason: format!("unknown normalizer '{other}'"),
        }),
    }
}

/// Trim, Unicode NFC, collapse whitespace runs; empty result is null.
#[must_use]
pub fn normalize_string(value: Value) -> Value {
    let Value::Str(s) = value else { return value };
    let trimmed: String = s.trim().nfc().collect();
    let collapsed = collapse_whitespace(&trimmed);
    if collapsed.is_empty() {
        Value::Null
    } else {
        Value::Str(collapsed)
    }
}

/// Identifier canonicalization: uppercase letter-prefixed identifiers,
/// lowercase the registrant half of DOI-like values, accept numeric
/// identifiers only when all-digit.
#[must_use]
pub fn normalize_identifier(value: Value) -> Value {
    let Value::Str(s) = value else { return value };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if UPPER_ID.is_match(trimmed) {
        return Value::Str(trimmed.to_ascii_uppercase());
    }
    if DOI.is_match(trimmed) {
        // Lowercase the prefix (registrant) part; suffixes are
        // case-sensitive by the DOI spec, so they stay untouched.
        let (prefix, suffix) = trimmed.split_once('/').expect("DOI regex guarantees a slash");
        return Value::Str(format!("{}/{suffix}", prefix.to_ascii_lowercase()));
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Value::Str(trimmed.to_string());
    }
    Value::Str(trimmed.to_string())
}

/// SMILES: trim and collapse internal whitespace.
#[must_use]
pub fn normalize_smiles(value: Value) -> Value {
    let Value::Str(s) = value else { return value };
    let cleaned: String = s.split_whitespace().collect();
    if cleaned.is_empty() {
        Value::Null
    } else {
        Value::Str(cleaned)
    }
}

/// InChI: trim and collapse; values not starting with `InChI=` are rejected
/// to null.
#[must_use]
pub fn normalize_inchi(value: Value) -> Value {
    let Value::Str(s) = value else { return value };
    let cleaned: String = s.split_whitespace().collect();
    if cleaned.starts_with("InChI=") {
        Value::Str(cleaned)
    } else {
        Value::Null
    }
}

/// Numeric coercion to 64-bit float; NaN is null. Range checking belongs to
/// the validator, not here.
#[must_use]
pub fn normalize_numeric(value: Value) -> Value {
    match value {
        Value::Int(i) => Value::Float(i as f64),
        Value::Float(f) if f.is_nan() => Value::Null,
        Value::Float(f) => Value::Float(f),
        Value::Str(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_nan() => Value::Null,
            Ok(f) => Value::Float(f),
            Err(_) => Value::Null,
        },
        Value::Null => Value::Null,
        other => other,
    }
}

/// Datetime coercion to UTC. Accepts RFC 3339 and bare dates.
#[must_use]
pub fn normalize_datetime(value: Value) -> Value {
    match value {
        Value::Instant(t) => Value::Instant(t),
        Value::Str(s) => {
            let trimmed = s.trim();
            if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
                return Value::Instant(t.with_timezone(&Utc));
            }
            if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                if let Some(t) = d.and_hms_opt(0, 0, 0) {
                    return Value::Instant(DateTime::from_naive_utc_and_offset(t, Utc));
                }
            }
            Value::Null
        }
        Value::Null => Value::Null,
        other => other,
    }
}

/// Boolean coercion from the canonical set `{true, false, "true", "false",
/// 0, 1}`; everything else is null.
#[must_use]
pub fn normalize_boolean(value: Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(b),
        Value::Int(0) => Value::Bool(false),
        Value::Int(1) => Value::Bool(true),
        Value::Str(s) => match s.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        if c.is_whitespace() {
            in_run = true;
        } else {
            if in_run && !out.is_empty() {
                out.push(' ');
            }
            in_run = false;
            out.push(c);
        }
    }
    out
}

/// Normalize a whole dataset against its schema: align the column set to
/// the declared order, run each column's normalizers in order, then apply
/// the schema's declared type coercions. After this pass the dataset's
/// columns equal the schema's exactly and every cell is either null or the
/// column's type (anything else is left for the validator to flag).
///
/// # Errors
///
/// `ConfigError::InvalidValue` if a column names an unknown normalizer.
pub fn normalize_dataset(dataset: &mut Dataset, schema: &Schema) -> Result<(), EtlError> {
    dataset.set_columns(schema.column_order());
    dataset.align_to_columns();

    for row in dataset.rows_mut() {
        for spec in &schema.columns {
            let mut value = row.get(&spec.name).clone();
            for normalizer in &spec.normalizers {
                value = apply_normalizer(normalizer, value).map_err(EtlError::Config)?;
            }
            value = coerce_to_type(value, spec.ty);
            if value.is_null() && !spec.nullable && spec.ty == ColumnType::Bool {
                // Non-nullable flag columns (conflict markers) default off.
                value = Value::Bool(false);
            }
            row.set(spec.name.clone(), value);
        }
    }
    Ok(())
}

/// The schema's declared coercions, applied once after normalizers.
fn coerce_to_type(value: Value, ty: ColumnType) -> Value {
    match (value, ty) {
        (Value::Null, _) => Value::Null,
        (Value::Float(f), ColumnType::Int) if f.fract() == 0.0 && f.is_finite() => {
            Value::Int(f as i64)
        }
        (Value::Str(s), ColumnType::Int) => s.trim().parse::<i64>().map_or(Value::Null, Value::Int),
        (Value::Int(i), ColumnType::Float) => Value::Float(i as f64),
        (Value::Str(s), ColumnType::Float) => {
            s.trim().parse::<f64>().map_or(Value::Null, |f| {
                if f.is_nan() {
                    Value::Null
                } else {
                    Value::Float(f)
                }
            })
        }
        (Value::Int(i), ColumnType::Str) => Value::Str(i.to_string()),
        (Value::Bool(b), ColumnType::Str) => Value::Str(b.to_string()),
        (v, ColumnType::Bool) if !matches!(v, Value::Bool(_)) => normalize_boolean(v),
        (Value::Str(s), ColumnType::Instant) => normalize_datetime(Value::Str(s)),
        (v, _) => v,
    }
}
