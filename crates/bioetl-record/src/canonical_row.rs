//! Canonical row serialization and content hashing.
//!
//! For any validated row, produce a byte string that is identical across
//! runs, processes, and platforms, then hash it with SHA-256. The rules:
//!
//! - keys sorted lexicographically, compact separators, no whitespace;
//! - null in a string column renders as `""`, null elsewhere as `null`;
//! - floats render fixed-point with the column's declared precision
//!   (schema precision map; 6 fractional digits unless overridden);
//! - instants render as ISO-8601 UTC with a trailing `Z`;
//! - nested trees render as RFC 8785 canonical JSON.
//!
//! The serializer walks an explicit column plan; it never iterates an
//! unordered map and never consults runtime locale.

use anyhow::{Context, Result};

use bioetl_util::canonical::sha256_hex_str;

use crate::value::{Record, Value};

/// How one column renders during canonical serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    Str,
    Int,
    Float,
    Bool,
    Instant,
    Json,
}

/// Per-column rendering instruction derived from the schema.
#[derive(Debug, Clone)]
pub struct ColumnRender {
    pub name: String,
    pub kind: RenderKind,
    /// Fractional digits for `Float` columns; ignored otherwise.
    pub precision: u8,
}

impl ColumnRender {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RenderKind, precision: u8) -> Self {
        Self {
            name: name.into(),
            kind,
            precision,
        }
    }
}

/// Serialize one row against the column plan into canonical JSON text.
///
/// # Errors
///
/// Fails only when a nested `Json` value cannot be canonicalized, which
/// indicates a non-JSON-serializable tree slipped past validation.
pub fn canonical_row_json(row: &Record, plan: &[ColumnRender]) -> Result<String> {
    let mut sorted: Vec<&ColumnRender> = plan.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::with_capacity(plan.len() * 24);
    out.push('{');
    for (i, col) in sorted.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(&mut out, &col.name);
        out.push(':');
        write_cell(&mut out, row.get(&col.name), col)?;
    }
    out.push('}');
    Ok(out)
}

/// `hash_row` = SHA-256 of the canonical row bytes, 64 lowercase hex chars.
pub fn hash_row(row: &Record, plan: &[ColumnRender]) -> Result<String> {
    Ok(sha256_hex_str(&canonical_row_json(row, plan)?))
}

/// `hash_business_key` = SHA-256 of the primary identifier bytes.
#[must_use]
pub fn hash_business_key(primary_id: &str) -> String {
    sha256_hex_str(primary_id)
}

fn write_cell(out: &mut String, value: &Value, col: &ColumnRender) -> Result<()> {
    match (value, col.kind) {
        // The null-policy asymmetry: string columns carry "" for null.
        (Value::Null, RenderKind::Str) => out.push_str("\"\""),
        (Value::Null, _) => out.push_str("null"),

        (Value::Str(s), _) => write_json_string(out, s),
        (Value::Int(i), RenderKind::Float) => {
            write_fixed_float(out, *i as f64, col.precision);
        }
        (Value::Int(i), _) => out.push_str(&i.to_string()),
        (Value::Float(f), _) => {
            if f.is_nan() {
                // NaN is normalized to null upstream; render defensively the
                // same way so a stray NaN cannot poison determinism.
                if col.kind == RenderKind::Str {
                    out.push_str("\"\"");
                } else {
                    out.push_str("null");
                }
            } else {
                write_fixed_float(out, *f, col.precision);
            }
        }
        (Value::Bool(b), _) => out.push_str(if *b { "true" } else { "false" }),
        (Value::Instant(t), _) => {
            write_json_string(out, &t.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        }
        (Value::Json(j), _) => {
            let bytes = serde_json_canonicalizer::to_vec(j)
                .with_context(|| format!("failed to canonicalize nested value in '{}'", col.name))?;
            let text = String::from_utf8(bytes)
                .with_context(|| format!("nested value in '{}' is not UTF-8", col.name))?;
            out.push_str(&text);
        }
    }
    Ok(())
}

fn write_fixed_float(out: &mut String, v: f64, precision: u8) {
    out.push_str(&format!("{v:.prec$}", prec = precision as usize));
}

fn write_json_string(out: &mut String, s: &str) {
    // serde_json's string escaping is deterministic and locale-free.
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn plan() -> Vec<ColumnRender> {
        vec![
            ColumnRender::new("molecule_chembl_id", RenderKind::Str, 6),
            ColumnRender::new("standard_value", RenderKind::Float, 6),
            ColumnRender::new("pchembl_value", RenderKind::Float, 4),
            ColumnRender::new("row_index", RenderKind::Int, 6),
            ColumnRender::new("is_duplicate", RenderKind::Bool, 6),
        ]
    }

    fn row() -> Record {
        let mut r = Record::new();
        r.set("molecule_chembl_id", Value::Str("CHEMBL25".into()));
        r.set("standard_value", Value::Float(12.5));
        r.set("pchembl_value", Value::Float(7.30001));
        r.set("row_index", Value::Int(0));
        r.set("is_duplicate", Value::Bool(false));
        r
    }

    #[test]
    fn keys_are_sorted_and_separators_compact() {
        let json = canonical_row_json(&row(), &plan()).unwrap();
        assert_eq!(
            json,
            r#"{"is_duplicate":false,"molecule_chembl_id":"CHEMBL25","pchembl_value":7.3000,"row_index":0,"standard_value":12.500000}"#
        );
    }

    #[test]
    fn precision_map_overrides_default_six() {
        let json = canonical_row_json(&row(), &plan()).unwrap();
        assert!(json.contains("\"pchembl_value\":7.3000"));
        assert!(json.contains("\"standard_value\":12.500000"));
    }

    #[test]
    fn null_policy_asymmetry() {
        let p = vec![
            ColumnRender::new("comment", RenderKind::Str, 6),
            ColumnRender::new("standard_value", RenderKind::Float, 6),
        ];
        let r = Record::new(); // both fields absent
        let json = canonical_row_json(&r, &p).unwrap();
        assert_eq!(json, r#"{"comment":"","standard_value":null}"#);
    }

    #[test]
    fn instants_render_utc_with_z() {
        let p = vec![ColumnRender::new("extracted_at", RenderKind::Instant, 6)];
        let mut r = Record::new();
        r.set(
            "extracted_at",
            Value::Instant(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap()),
        );
        let json = canonical_row_json(&r, &p).unwrap();
        assert_eq!(json, r#"{"extracted_at":"2024-03-01T12:00:05Z"}"#);
    }

    #[test]
    fn nested_trees_use_canonical_json() {
        let p = vec![ColumnRender::new("audit_trail", RenderKind::Json, 6)];
        let mut r = Record::new();
        r.set(
            "audit_trail",
            Value::Json(serde_json::json!({"z": 1, "a": {"y": 2, "x": 3}})),
        );
        let json = canonical_row_json(&r, &p).unwrap();
        assert_eq!(json, r#"{"audit_trail":{"a":{"x":3,"y":2},"z":1}}"#);
    }

    #[test]
    fn nan_renders_as_null() {
        let p = vec![ColumnRender::new("standard_value", RenderKind::Float, 6)];
        let mut r = Record::new();
        r.set("standard_value", Value::Float(f64::NAN));
        assert_eq!(
            canonical_row_json(&r, &p).unwrap(),
            r#"{"standard_value":null}"#
        );
    }

    #[test]
    fn hash_row_is_64_lowercase_hex() {
        let h = hash_row(&row(), &plan()).unwrap();
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_depends_only_on_planned_columns() {
        let mut extended = row();
        extended.set("unplanned", Value::Str("ignored".into()));
        assert_eq!(
            hash_row(&row(), &plan()).unwrap(),
            hash_row(&extended, &plan()).unwrap()
        );
    }

    #[test]
    fn business_key_hash_known_vector() {
        assert_eq!(
            hash_business_key("CHEMBL25"),
            sha256_hex_str("CHEMBL25"),
        );
    }

    proptest! {
        #[test]
        fn serialization_is_deterministic(
            s in "\\PC*",
            f in -1.0e9f64..1.0e9,
            i in any::<i64>()
        ) {
            let p = vec![
                ColumnRender::new("s", RenderKind::Str, 6),
                ColumnRender::new("f", RenderKind::Float, 6),
                ColumnRender::new("i", RenderKind::Int, 6),
            ];
            let mut r = Record::new();
            r.set("s", Value::Str(s));
            r.set("f", Value::Float(f));
            r.set("i", Value::Int(i));

            let once = canonical_row_json(&r, &p).unwrap();
            let twice = canonical_row_json(&r, &p).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(hash_row(&r, &p).unwrap(), hash_row(&r, &p).unwrap());
        }

        #[test]
        fn field_insertion_order_never_matters(a in any::<i64>(), b in any::<i64>()) {
            let p = vec![
                ColumnRender::new("a", RenderKind::Int, 6),
                ColumnRender::new("b", RenderKind::Int, 6),
            ];
            let mut fwd = Record::new();
            fwd.set("a", Value::Int(a));
            fwd.set("b", Value::Int(b));
            let mut rev = Record::new();
            rev.set("b", Value::Int(b));
            rev.set("a", Value::Int(a));
            prop_assert_eq!(
                canonical_row_json(&fwd, &p).unwrap(),
                canonical_row_json(&rev, &p).unwrap()
            );
        }
    }
}
