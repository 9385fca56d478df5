//! Typed records, datasets, and canonical row hashing.
//!
//! A [`Value`] is the tagged-sum type mediating every I/O boundary; a
//! [`Record`] is an ordered field map; a [`Dataset`] is an ordered sequence
//! of records under a fixed column order. [`canonical_row`] turns a
//! validated row into the byte string whose SHA-256 digest is stable across
//! runs, processes, and platforms.

pub mod canonical_row;
pub mod dataset;
pub mod value;

pub use canonical_row::{canonical_row_json, hash_business_key, hash_row, ColumnRender, RenderKind};
pub use dataset::Dataset;
pub use value::{Record, Value};
