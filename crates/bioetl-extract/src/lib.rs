//! Extraction orchestrator.
//!
//! Turns a list of primary identifiers into a flat in-memory dataset:
//! batched requests respecting count and URL-length limits, offset/cursor
//! pagination, long-format explosion of nested arrays, fallback records for
//! identifiers that cannot be fetched within the retry budget, and bounded
//! parallel enrichment extraction with per-source timeouts.

pub mod batch;
pub mod fallback;
pub mod flatten;
pub mod metrics;
pub mod orchestrator;
pub mod paging;
pub mod source;

pub use batch::{Batch, BatchPlanner};
pub use fallback::fallback_record;
pub use flatten::{flatten_item, ChildArraySpec, FlattenSpec};
pub use metrics::{MetricsRegistry, MetricsSnapshot, SourceMetrics};
pub use orchestrator::{ExtractOutcome, Orchestrator};
pub use source::{items_at, probe_release};
