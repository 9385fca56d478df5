//! Process-local schema registry.
//!
//! Populated at startup from the declared pool of schemas; read-only for the
//! rest of the process lifetime. Versioned lookup performs the drift check:
//! a major-version mismatch either fails hard (strict) or warns and
//! continues; minor/patch differences never fail.

use std::collections::BTreeMap;

use tracing::warn;

use bioetl_util::error::SemanticError;

use crate::model::{ColumnSpec, ColumnType, Schema, SchemaVersion};

/// Process-local map `schema_id -> Schema`.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in schema pool.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(activity_schema());
        registry
    }

    pub fn register(&mut self, schema: Schema) {
        self.schemas.insert(schema.id.clone(), schema);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.schemas.keys()
    }

    /// Look up a schema by id and expected version, performing the drift
    /// check before any other work (in particular, before any HTTP request).
    ///
    /// # Errors
    ///
    /// `SchemaDrift` when the loaded major differs from the expected major
    /// and `strict` is set; also when the id is unknown.
    pub fn get_versioned(
        &self,
        id: &str,
        expected: SchemaVersion,
        strict: bool,
    ) -> Result<&Schema, SemanticError> {
        let schema = self.schemas.get(id).ok_or_else(|| SemanticError::SchemaDrift {
            id: id.to_string(),
            expected: expected.to_string(),
            actual: "<unregistered>".to_string(),
        })?;

        if schema.version.major != expected.major {
            if strict {
                return Err(SemanticError::SchemaDrift {
                    id: id.to_string(),
                    expected: expected.to_string(),
                    actual: schema.version.to_string(),
                });
            }
            warn!(
                schema_id = id,
                expected = %expected,
                loaded = %schema.version,
                "schema major version drift, continuing (strict drift checking off)"
            );
        }

        Ok(schema)
    }
}

/// The bioactivity ("activity") dataset schema.
///
/// Long-format rows: one per activity, plus one per exploded activity
/// parameter (`row_subtype` = `param`). `record_id` is the business key and
/// is unique across parents and children. Merged document fields (`doi`,
/// `journal`, `year`) carry `<field>_source` and `conflict_<field>`
/// companions written by the merge engine.
#[must_use]
pub fn activity_schema() -> Schema {
    let columns = vec![
        ColumnSpec::new("record_id", ColumnType::Str, false)
            .unique()
            .pattern(r"[A-Za-z0-9._:-]+"),
        ColumnSpec::new("activity_id", ColumnType::Int, true).range(0.0, 1e15),
        ColumnSpec::new("molecule_chembl_id", ColumnType::Str, true)
            .pattern(r"CHEMBL\d+")
            .normalizers(&["identifier"]),
        ColumnSpec::new("target_chembl_id", ColumnType::Str, true)
            .pattern(r"CHEMBL\d+")
            .normalizers(&["identifier"]),
        ColumnSpec::new("assay_chembl_id", ColumnType::Str, true)
            .pattern(r"CHEMBL\d+")
            .normalizers(&["identifier"]),
        ColumnSpec::new("document_chembl_id", ColumnType::Str, true)
            .pattern(r"CHEMBL\d+")
            .normalizers(&["identifier"]),
        ColumnSpec::new("doi", ColumnType::Str, true).normalizers(&["identifier"]),
        ColumnSpec::new("doi_source", ColumnType::Str, true),
        ColumnSpec::new("conflict_doi", ColumnType::Bool, false),
        ColumnSpec::new("journal", ColumnType::Str, true).normalizers(&["string"]),
        ColumnSpec::new("journal_source", ColumnType::Str, true),
        ColumnSpec::new("conflict_journal", ColumnType::Bool, false),
        ColumnSpec::new("year", ColumnType::Int, true).range(1800.0, 2100.0),
        ColumnSpec::new("year_source", ColumnType::Str, true),
        ColumnSpec::new("conflict_year", ColumnType::Bool, false),
        ColumnSpec::new("standard_type", ColumnType::Str, true).normalizers(&["string"]),
        ColumnSpec::new("standard_relation", ColumnType::Str, true)
            .allowed(&["=", "<", ">", "<=", ">=", "~"]),
        ColumnSpec::new("standard_value", ColumnType::Float, true)
            .range(0.0, 1e12)
            .normalizers(&["numeric"]),
        ColumnSpec::new("standard_units", ColumnType::Str, true).normalizers(&["string"]),
        ColumnSpec::new("pchembl_value", ColumnType::Float, true)
            .range(0.0, 14.0)
            .normalizers(&["numeric"]),
        ColumnSpec::new("canonical_smiles", ColumnType::Str, true).normalizers(&["smiles"]),
        ColumnSpec::new("activity_comment", ColumnType::Str, true).normalizers(&["string"]),
        ColumnSpec::new("data_validity_comment", ColumnType::Str, true).normalizers(&["string"]),
        ColumnSpec::new("row_subtype", ColumnType::Str, false).allowed(&["activity", "param"]),
        ColumnSpec::new("row_index", ColumnType::Int, false).range(0.0, 1e6),
        ColumnSpec::new("source_system", ColumnType::Str, false),
        ColumnSpec::new("error_code", ColumnType::Str, true),
        ColumnSpec::new("http_status", ColumnType::Int, true).range(100.0, 599.0),
        ColumnSpec::new("attempt", ColumnType::Int, true).range(1.0, 100.0),
        ColumnSpec::new("retry_after_hint", ColumnType::Int, true).range(0.0, 86_400.0),
        ColumnSpec::new("run_id", ColumnType::Str, false).pattern(r"[a-f0-9]{16}"),
        ColumnSpec::new("audit_trail", ColumnType::Json, true),
    ];

    let mut precision = BTreeMap::new();
    precision.insert("pchembl_value".to_string(), 4);

    Schema {
        id: "activity".to_string(),
        version: SchemaVersion::new(2, 1, 0),
        columns,
        precision,
        sort_keys: vec!["record_id".to_string()],
        primary_key: "record_id".to_string(),
        cross_checks: vec!["value_requires_units".to_string()],
        default_precision: 6,
    }
}
