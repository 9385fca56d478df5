//! The tagged value type and ordered record map.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single typed cell value.
///
/// Every field of every record is one of these. `Json` holds a nested
/// JSON-serializable tree (audit columns, exploded leftovers); it is never a
/// substitute for a typed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Instant(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null, or a string that is empty after trimming. Merge precedence
    /// treats both as "no value from this source".
    #[must_use]
    pub fn is_absent(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Str(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Instant(_) => "instant",
            Self::Json(_) => "json",
        }
    }

    /// Convert a raw JSON scalar into a typed value. Arrays and objects map
    /// to `Json`; callers that expect typed columns flatten those first.
    #[must_use]
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Str(s.clone()),
            other => Self::Json(other.clone()),
        }
    }

    /// Render for human-facing diagnostics (failure cases, logs).
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Null => "<null>".to_string(),
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Instant(t) => t.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            Self::Json(j) => j.to_string(),
        }
    }

    /// Total order used by the deterministic sort: nulls last, then by value
    /// within a type, then by type tag for mixed columns (which validation
    /// rejects, so the tag branch is a tie-breaker, not a data path).
    #[must_use]
    pub fn cmp_for_sort(&self, other: &Self) -> Ordering {
        fn tag(v: &Value) -> u8 {
            match v {
                Value::Str(_) => 0,
                Value::Int(_) => 1,
                Value::Float(_) => 2,
                Value::Bool(_) => 3,
                Value::Instant(_) => 4,
                Value::Json(_) => 5,
                Value::Null => 6,
            }
        }

        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Greater,
            (_, Self::Null) => Ordering::Less,
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Int(a), Self::Float(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Self::Float(a), Self::Int(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Instant(a), Self::Instant(b)) => a.cmp(b),
            (Self::Json(a), Self::Json(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) => tag(a).cmp(&tag(b)),
        }
    }
}

/// One record: an ordered mapping from field name to typed value.
///
/// Field order is preserved for debugging but canonical serialization sorts
/// keys, so insertion order never leaks into hashes or artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Get a field; absent fields read as `Null`.
    #[must_use]
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&Value::Null)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_covers_null_and_blank_strings() {
        assert!(Value::Null.is_absent());
        assert!(Value::Str(String::new()).is_absent());
        assert!(Value::Str("  ".into()).is_absent());
        assert!(!Value::Str("x".into()).is_absent());
        assert!(!Value::Int(0).is_absent());
        assert!(!Value::Bool(false).is_absent());
    }

    #[test]
    fn from_json_maps_scalars() {
        assert_eq!(Value::from_json(&serde_json::json!(null)), Value::Null);
        assert_eq!(Value::from_json(&serde_json::json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(&serde_json::json!(2.5)), Value::Float(2.5));
        assert_eq!(
            Value::from_json(&serde_json::json!("CHEMBL25")),
            Value::Str("CHEMBL25".into())
        );
        assert!(matches!(
            Value::from_json(&serde_json::json!([1, 2])),
            Value::Json(_)
        ));
    }

    #[test]
    fn sort_order_puts_nulls_last() {
        let mut values = vec![
            Value::Null,
            Value::Int(2),
            Value::Int(1),
            Value::Null,
            Value::Int(3),
        ];
        values.sort_by(|a, b| a.cmp_for_sort(b));
        assert_eq!(
            values,
            vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::Null,
                Value::Null
            ]
        );
    }

    #[test]
    fn mixed_numeric_comparison() {
        assert_eq!(
            Value::Int(2).cmp_for_sort(&Value::Float(2.5)),
            Ordering::Less
        );
        assert_eq!(
            Value::Float(3.0).cmp_for_sort(&Value::Int(3)),
            Ordering::Equal
        );
    }

    #[test]
    fn record_reads_missing_fields_as_null() {
        let mut rec = Record::new();
        rec.set("molecule_chembl_id", Value::Str("CHEMBL25".into()));
        assert_eq!(rec.get("molecule_chembl_id").as_str(), Some("CHEMBL25"));
        assert!(rec.get("missing").is_null());
    }
}
