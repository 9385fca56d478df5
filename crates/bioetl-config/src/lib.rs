//! Layered, validated configuration.
//!
//! Precedence, lowest to highest: built-in defaults → YAML profile →
//! `BIOETL_`-prefixed environment variables (double-underscore path
//! separators) → repeatable `--set key.path=value` CLI overrides. All keys
//! are declared statically; unknown keys and out-of-range values are hard
//! errors. Each override records its source for status display, and the
//! resolved configuration has a SHA-256 fingerprint over its canonical JSON.

pub mod layering;
pub mod model;

pub use layering::{load, ConfigSource, LoadOptions, ResolvedConfig};
pub use model::{
    AppConfig, CacheConfig, HttpConfig, InputConfig, MergeConfig, OutputConfig, PaginationMode,
    PipelineConfig, PostprocessConfig, RateLimitConfig, SourceConfig, SourceKind, ValidationConfig,
};
