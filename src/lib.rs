//! bioetl — deterministic ETL engine for bioactivity dataset acquisition.
//!
//! The root crate carries the CLI surface only; all pipeline logic lives in
//! the workspace member crates. Library consumers embed the pipeline via
//! [`bioetl_engine::Pipeline`] directly.

pub mod cli;

pub use bioetl_config::{AppConfig, ResolvedConfig};
pub use bioetl_engine::{Pipeline, PipelineOptions, RunSummary};
pub use bioetl_util::{EtlError, ExitCode};
