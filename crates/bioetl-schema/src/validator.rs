//! Lazy dataset validation against a schema.
//!
//! Collects every failure from one dataset rather than aborting on the
//! first, then raises a single aggregate error listing failure cases
//! (column, failed check, failing values up to a cap). This supports
//! fix-all-at-once workflows. No implicit coercion happens here: types must
//! already match, courtesy of the Normalize stage.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use bioetl_record::{Dataset, Record, Value};
use bioetl_util::error::{FailureCase, SemanticError};

use crate::model::{ColumnSpec, ColumnType, Schema};

/// Validation options.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorOptions {
    /// Maximum offending values recorded per failure case.
    pub max_examples: usize,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self { max_examples: 5 }
    }
}

/// Validate a dataset against a schema, lazily.
///
/// # Errors
///
/// `SemanticError::ValidationFailed` carrying every failure case found.
pub fn validate(
    dataset: &Dataset,
    schema: &Schema,
    opts: ValidatorOptions,
) -> Result<(), SemanticError> {
    let mut failures: Vec<FailureCase> = Vec::new();
    let present: HashSet<&String> = dataset.columns().iter().collect();

    for spec in &schema.columns {
        if !present.contains(&spec.name) {
            failures.push(FailureCase {
                column: spec.name.clone(),
                check: "presence".into(),
                values: vec![],
                count: dataset.len(),
            });
            continue;
        }
        check_column(dataset, spec, opts, &mut failures);
    }

    for extra in dataset
        .columns()
        .iter()
        .filter(|c| schema.column(c).is_none())
    {
        failures.push(FailureCase {
            column: extra.clone(),
            check: "undeclared".into(),
            values: vec![],
            count: dataset.len(),
        });
    }

    for check in &schema.cross_checks {
        run_cross_check(dataset, check, opts, &mut failures);
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(SemanticError::ValidationFailed { failures })
    }
}

/// Enforce that the dataset's columns equal the schema's declared order,
/// element-wise. Runs immediately before Load.
pub fn enforce_column_order(dataset: &Dataset, schema: &Schema) -> Result<(), SemanticError> {
    let expected = schema.column_order();
    if dataset.columns() != expected.as_slice() {
        return Err(SemanticError::ColumnOrderMismatch {
            expected,
            actual: dataset.columns().to_vec(),
        });
    }
    Ok(())
}

fn check_column(
    dataset: &Dataset,
    spec: &ColumnSpec,
    opts: ValidatorOptions,
    failures: &mut Vec<FailureCase>,
) {
    let mut type_bad: Vec<String> = Vec::new();
    let mut type_bad_count = 0usize;
    let mut null_count = 0usize;
    let mut range_bad: Vec<String> = Vec::new();
    let mut range_bad_count = 0usize;
    let mut pattern_bad: Vec<String> = Vec::new();
    let mut pattern_bad_count = 0usize;
    let mut enum_bad: Vec<String> = Vec::new();
    let mut enum_bad_count = 0usize;
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();

    let pattern = spec.pattern.as_deref().map(full_match_regex);

    for row in dataset.rows() {
        let value = row.get(&spec.name);

        if value.is_null() {
            null_count += 1;
            continue;
        }

        if !type_matches(value, spec.ty) {
            type_bad_count += 1;
            if type_bad.len() < opts.max_examples {
                type_bad.push(format!("{} ({})", value.display(), value.type_name()));
            }
            continue;
        }

        if let Some((min, max)) = spec.range {
            if let Some(n) = value.as_float() {
                if n < min || n > max {
                    range_bad_count += 1;
                    if range_bad.len() < opts.max_examples {
                        range_bad.push(value.display());
                    }
                }
            }
        }

        if let Some(re) = &pattern {
            if let Some(s) = value.as_str() {
                if !re.is_match(s) {
                    pattern_bad_count += 1;
                    if pattern_bad.len() < opts.max_examples {
                        pattern_bad.push(s.to_string());
                    }
                }
            }
        }

        if let Some(allowed) = &spec.allowed {
            if let Some(s) = value.as_str() {
                if !allowed.iter().any(|a| a == s) {
                    enum_bad_count += 1;
                    if enum_bad.len() < opts.max_examples {
                        enum_bad.push(s.to_string());
                    }
                }
            }
        }

        if spec.unique {
            *seen.entry(value.display()).or_insert(0) += 1;
        }
    }

    if type_bad_count > 0 {
        failures.push(FailureCase {
            column: spec.name.clone(),
            check: "type".into(),
            values: type_bad,
            count: type_bad_count,
        });
    }
    if !spec.nullable && null_count > 0 {
        failures.push(FailureCase {
            column: spec.name.clone(),
            check: "nullability".into(),
            values: vec![],
            count: null_count,
        });
    }
    if range_bad_count > 0 {
        failures.push(FailureCase {
            column: spec.name.clone(),
            check: "range".into(),
            values: range_bad,
            count: range_bad_count,
        });
    }
    if pattern_bad_count > 0 {
        failures.push(FailureCase {
            column: spec.name.clone(),
            check: "pattern".into(),
            values: pattern_bad,
            count: pattern_bad_count,
        });
    }
    if enum_bad_count > 0 {
        failures.push(FailureCase {
            column: spec.name.clone(),
            check: "enum".into(),
            values: enum_bad,
            count: enum_bad_count,
        });
    }
    if spec.unique {
        let dupes: Vec<(&String, &usize)> = seen.iter().filter(|(_, n)| **n > 1).collect();
        if !dupes.is_empty() {
            let count: usize = dupes.iter().map(|(_, n)| **n - 1).sum();
            failures.push(FailureCase {
                column: spec.name.clone(),
                check: "unique".into(),
                values: dupes
                    .iter()
                    .take(opts.max_examples)
                    .map(|(v, _)| (*v).clone())
                    .collect(),
                count,
            });
        }
    }
}

fn type_matches(value: &Value, ty: ColumnType) -> bool {
    matches!(
        (value, ty),
        (Value::Str(_), ColumnType::Str)
            | (Value::Int(_), ColumnType::Int)
            | (Value::Float(_), ColumnType::Float)
            | (Value::Bool(_), ColumnType::Bool)
            | (Value::Instant(_), ColumnType::Instant)
            | (Value::Json(_), ColumnType::Json)
    )
}

fn full_match_regex(pattern: &str) -> Regex {
    static CACHE: Lazy<std::sync::Mutex<BTreeMap<String, Regex>>> =
        Lazy::new(|| std::sync::Mutex::new(BTreeMap::new()));
    let mut cache = CACHE.lock().expect("regex cache poisoned");
    cache
        .entry(pattern.to_string())
        .or_insert_with(|| {
            Regex::new(&format!("^(?:{pattern})$")).unwrap_or_else(|e| {
                panic!("invalid column pattern '{pattern}': {e}");
            })
        })
        .clone()
}

/// Cross-column predicates, evaluated after per-column checks. Predicates
/// are named in the schema; unknown names are a programming error caught in
/// tests, reported as a failure case rather than a panic at runtime.
fn run_cross_check(
    dataset: &Dataset,
    check: &str,
    opts: ValidatorOptions,
    failures: &mut Vec<FailureCase>,
) {
    match check {
        "value_requires_units" => {
            let bad: Vec<&Record> = dataset
                .rows()
                .iter()
                .filter(|r| !r.get("standard_value").is_null() && r.get("standard_units").is_null())
                .collect();
            if !bad.is_empty() {
                failures.push(FailureCase {
                    column: "standard_units".into(),
                    check: "value_requires_units".into(),
                    values: bad
                        .iter()
                        .take(opts.max_examples)
                        .map(|r| r.get("record_id").display())
                        .collect(),
                    count: bad.len(),
                });
            }
        }
        other => {
            failures.push(FailureCase {
                column: "<schema>".into(),
                check: format!("unknown_cross_check:{other}"),
                values: vec![],
                count: 0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::activity_schema;
    use std::collections::BTreeMap as Map;

    use crate::model::SchemaVersion;

    fn small_schema() -> Schema {
        Schema {
            id: "t".into(),
            version: SchemaVersion::new(1, 0, 0),
            columns: vec![
                ColumnSpec::new("record_id", ColumnType::Str, false)
                    .unique()
                    .pattern(r"[A-Z0-9:]+"),
                ColumnSpec::new("standard_value", ColumnType::Float, true).range(0.0, 100.0),
                ColumnSpec::new("standard_relation", ColumnType::Str, true).allowed(&["=", "<"]),
            ],
            precision: Map::new(),
            sort_keys: vec![],
            primary_key: "record_id".into(),
            cross_checks: vec![],
            default_precision: 6,
        }
    }

    fn dataset(rows: Vec<Vec<(&str, Value)>>) -> Dataset {
        let mut ds = Dataset::new(vec![
            "record_id".into(),
            "standard_value".into(),
            "standard_relation".into(),
        ]);
        for pairs in rows {
            ds.push(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect::<Record>(),
            );
        }
        ds
    }

    #[test]
    fn valid_dataset_passes() {
        let ds = dataset(vec![vec![
            ("record_id", Value::Str("A:1".into())),
            ("standard_value", Value::Float(10.0)),
            ("standard_relation", Value::Str("=".into())),
        ]]);
        assert!(validate(&ds, &small_schema(), ValidatorOptions::default()).is_ok());
    }

    #[test]
    fn collects_all_failures_not_just_first() {
        let ds = dataset(vec![
            vec![
                ("record_id", Value::Null),                      // nullability
                ("standard_value", Value::Float(1000.0)),        // range
                ("standard_relation", Value::Str("~".into())),   // enum
            ],
            vec![
                ("record_id", Value::Str("bad id!".into())),     // pattern
                ("standard_value", Value::Str("oops".into())),   // type
                ("standard_relation", Value::Str("<".into())),
            ],
        ]);

        let err = validate(&ds, &small_schema(), ValidatorOptions::default()).unwrap_err();
        let SemanticError::ValidationFailed { failures } = err else {
            panic!("expected ValidationFailed");
        };
        let checks: Vec<&str> = failures.iter().map(|f| f.check.as_str()).collect();
        assert!(checks.contains(&"nullability"));
        assert!(checks.contains(&"range"));
        assert!(checks.contains(&"enum"));
        assert!(checks.contains(&"pattern"));
        assert!(checks.contains(&"type"));
    }

    #[test]
    fn unique_check_counts_duplicates() {
        let ds = dataset(vec![
            vec![("record_id", Value::Str("A:1".into()))],
            vec![("record_id", Value::Str("A:1".into()))],
            vec![("record_id", Value::Str("A:2".into()))],
        ]);

        let err = validate(&ds, &small_schema(), ValidatorOptions::default()).unwrap_err();
        let SemanticError::ValidationFailed { failures } = err else {
            panic!("expected ValidationFailed");
        };
        let unique = failures.iter().find(|f| f.check == "unique").unwrap();
        assert_eq!(unique.count, 1);
        assert_eq!(unique.values, vec!["A:1".to_string()]);
    }

    #[test]
    fn missing_and_undeclared_columns_are_reported() {
        let mut ds = Dataset::new(vec!["record_id".into(), "mystery".into()]);
        ds.push(
            vec![
                ("record_id".to_string(), Value::Str("A:1".into())),
                ("mystery".to_string(), Value::Int(1)),
            ]
            .into_iter()
            .collect::<Record>(),
        );

        let err = validate(&ds, &small_schema(), ValidatorOptions::default()).unwrap_err();
        let SemanticError::ValidationFailed { failures } = err else {
            panic!("expected ValidationFailed");
        };
        assert!(failures
            .iter()
            .any(|f| f.check == "presence" && f.column == "standard_value"));
        assert!(failures
            .iter()
            .any(|f| f.check == "undeclared" && f.column == "mystery"));
    }

    #[test]
    fn example_values_are_capped() {
        let rows: Vec<Vec<(&str, Value)>> = (0..20)
            .map(|i| {
                vec![
                    ("record_id", Value::Str(format!("A:{i}"))),
                    ("standard_value", Value::Float(1e6 + f64::from(i))),
                ]
            })
            .collect();
        let ds = dataset(rows);

        let err = validate(&ds, &small_schema(), ValidatorOptions { max_examples: 3 }).unwrap_err();
        let SemanticError::ValidationFailed { failures } = err else {
            panic!("expected ValidationFailed");
        };
        let range = failures.iter().find(|f| f.check == "range").unwrap();
        assert_eq!(range.values.len(), 3);
        assert_eq!(range.count, 20);
    }

    #[test]
    fn column_order_is_enforced_element_wise() {
        let schema = small_schema();
        let ds = Dataset::new(vec![
            "standard_value".into(),
            "record_id".into(),
            "standard_relation".into(),
        ]);
        assert!(matches!(
            enforce_column_order(&ds, &schema),
            Err(SemanticError::ColumnOrderMismatch { .. })
        ));

        let ok = Dataset::new(schema.column_order());
        assert!(enforce_column_order(&ok, &schema).is_ok());
    }

    #[test]
    fn cross_check_value_requires_units() {
        let schema = activity_schema();
        let mut ds = Dataset::new(schema.column_order());
        let mut row: Record = schema
            .column_order()
            .into_iter()
            .map(|c| (c, Value::Null))
            .collect();
        row.set("record_id", Value::Str("1:activity:0".into()));
        row.set("conflict_doi", Value::Bool(false));
        row.set("conflict_journal", Value::Bool(false));
        row.set("conflict_year", Value::Bool(false));
        row.set("row_subtype", Value::Str("activity".into()));
        row.set("row_index", Value::Int(0));
        row.set("source_system", Value::Str("chembl".into()));
        row.set("run_id", Value::Str("abcdef0123456789".into()));
        row.set("standard_value", Value::Float(5.0));
        // standard_units left null: cross-check must fire.
        ds.push(row);

        let err = validate(&ds, &schema, ValidatorOptions::default()).unwrap_err();
        let SemanticError::ValidationFailed { failures } = err else {
            panic!("expected ValidationFailed");
        };
        assert!(failures.iter().any(|f| f.check == "value_requires_units"));
    }
}
