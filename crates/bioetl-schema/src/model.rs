//! Schema and column specifications.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use bioetl_record::{ColumnRender, RenderKind};
use bioetl_util::error::ConfigError;

/// Declared type of a column. There is no generic "object" type: every
/// column has an explicit typed representation with a nullable-aware null
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Str,
    Int,
    Float,
    Bool,
    Instant,
    Json,
}

impl ColumnType {
    #[must_use]
    pub fn render_kind(self) -> RenderKind {
        match self {
            Self::Str => RenderKind::Str,
            Self::Int => RenderKind::Int,
            Self::Float => RenderKind::Float,
            Self::Bool => RenderKind::Bool,
            Self::Instant => RenderKind::Instant,
            Self::Json => RenderKind::Json,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::Int => "integer",
            Self::Float => "float",
            Self::Bool => "boolean",
            Self::Instant => "instant",
            Self::Json => "json",
        }
    }
}

/// Specification of one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    /// Inclusive numeric range for `Int`/`Float` columns.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
    /// Regular expression a non-null string value must match in full.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Enumerated allowed values for non-null string values.
    #[serde(default)]
    pub allowed: Option<Vec<String>>,
    /// Normalizer names applied in order during the Normalize stage.
    #[serde(default)]
    pub normalizers: Vec<String>,
}

impl ColumnSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
            unique: false,
            range: None,
            pattern: None,
            allowed: None,
            normalizers: Vec::new(),
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|s| (*s).to_string()).collect());
        self
    }

    #[must_use]
    pub fn normalizers(mut self, names: &[&str]) -> Self {
        self.normalizers = names.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// Semantic version `MAJOR.MINOR.PATCH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(ConfigError::InvalidValue {
                key: "schema_version".into(),
                reason: format!("'{s}' is not MAJOR.MINOR.PATCH"),
            });
        }
        let parse = |p: &str| {
            p.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                key: "schema_version".into(),
                reason: format!("'{s}' has a non-numeric component"),
            })
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

/// The source of truth for one dataset type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub id: String,
    pub version: SchemaVersion,
    pub columns: Vec<ColumnSpec>,
    /// Fractional digits per float field; fields absent here render with
    /// [`Schema::default_precision`].
    pub precision: BTreeMap<String, u8>,
    /// Sort keys for the deterministic pre-Load sort. When empty the
    /// primary key is used.
    pub sort_keys: Vec<String>,
    /// The business-key column. Must be declared, unique, and non-null.
    pub primary_key: String,
    /// Names of cross-column predicates evaluated after per-column checks.
    #[serde(default)]
    pub cross_checks: Vec<String>,
    pub default_precision: u8,
}

impl Schema {
    /// The declared column order.
    #[must_use]
    pub fn column_order(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Column order plus the two hash columns appended at Load.
    #[must_use]
    pub fn output_columns(&self) -> Vec<String> {
        let mut cols = self.column_order();
        cols.push(HASH_BUSINESS_KEY_COLUMN.to_string());
        cols.push(HASH_ROW_COLUMN.to_string());
        cols
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Precision for one field: the precision map, then the default.
    #[must_use]
    pub fn precision_for(&self, field: &str) -> u8 {
        self.precision
            .get(field)
            .copied()
            .unwrap_or(self.default_precision)
    }

    /// Rendering plan for canonical serialization, derived entirely from
    /// this schema (the serializer holds no constants of its own).
    #[must_use]
    pub fn render_plan(&self) -> Vec<ColumnRender> {
        self.columns
            .iter()
            .map(|c| ColumnRender::new(&c.name, c.ty.render_kind(), self.precision_for(&c.name)))
            .collect()
    }

    /// Effective sort keys: declared keys, else the primary key.
    #[must_use]
    pub fn effective_sort_keys(&self) -> Vec<String> {
        if self.sort_keys.is_empty() {
            vec![self.primary_key.clone()]
        } else {
            self.sort_keys.clone()
        }
    }
}

/// Column carrying the SHA-256 of the primary identifier, appended at Load.
pub const HASH_BUSINESS_KEY_COLUMN: &str = "hash_business_key";

/// Column carrying the SHA-256 of the canonical row, appended at Load.
pub const HASH_ROW_COLUMN: &str = "hash_row";
