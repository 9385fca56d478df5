//! Normalizer and multi-source merge engine.
//!
//! [`normalize`] holds the catalog of deterministic, pure, per-value
//! normalization functions and the dataset-level pass that applies them
//! column by column. [`merge`] joins enrichment datasets onto the primary
//! dataset with field-level precedence, whitelisting, conflict detection,
//! and an audit trail. [`integrity`] reports unresolved references.

pub mod integrity;
pub mod merge;
pub mod normalize;

pub use integrity::{referential_gaps, IntegrityReport};
pub use merge::{merge_enrichment, MergeOptions, MergeOutcome, MergePlan};
pub use normalize::{apply_normalizer, normalize_dataset};
