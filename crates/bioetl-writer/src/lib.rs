//! Transactional output writer.
//!
//! Every artifact goes through the same protocol: write into the run-scoped
//! temp directory, checksum, atomically rename onto the final path, clean
//! up. An artifact set commits its files in declared order and finishes
//! with a completeness validation; either every required artifact appears
//! complete at its final path or the failure surfaces to the caller.

pub mod artifact;
pub mod csv_format;
pub mod manifest;
pub mod metadata;
pub mod naming;
pub mod quality;

pub use artifact::{ArtifactWriter, CommittedFile, PlannedArtifact};
pub use csv_format::{CsvFormat, FormatHandler};
pub use manifest::{Manifest, ManifestSchemaRef};
pub use metadata::MetadataDoc;
pub use naming::ArtifactNames;
pub use quality::QualityReport;
