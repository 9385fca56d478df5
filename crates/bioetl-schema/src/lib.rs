//! Schema model, registry, and dataset validation.
//!
//! A [`Schema`] is the source of truth for one dataset type: column specs,
//! semantic version, precision map, sort keys, and cross-column checks. The
//! [`SchemaRegistry`] is populated once at startup and read-only thereafter.
//! The [`validator`] enforces a schema lazily, collecting every failure from
//! a dataset before raising a single aggregate error.

pub mod model;
pub mod registry;
pub mod validator;

pub use model::{ColumnSpec, ColumnType, Schema, SchemaVersion};
pub use registry::SchemaRegistry;
pub use validator::{enforce_column_order, validate, ValidatorOptions};
