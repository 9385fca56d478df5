//! The run manifest: artifact map, checksum map, schema reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bioetl_util::canonical::to_canonical_json;
use bioetl_util::error::EtlError;

use crate::artifact::CommittedFile;

/// Schema reference; both fields nullable when no schema applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestSchemaRef {
    pub id: Option<String>,
    pub version: Option<String>,
}

/// The manifest document. Canonical artifact keys: `dataset`,
/// `quality_report`, optional `metadata`, optional `qc.correlation_report`,
/// optional `additional_datasets.<name>.{csv,parquet}`, optional
/// `debug_dataset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    /// Canonical key → file name.
    pub artifacts: BTreeMap<String, String>,
    /// File name → SHA-256 hex.
    pub checksums: BTreeMap<String, String>,
    pub schema: ManifestSchemaRef,
}

impl Manifest {
    /// Assemble a manifest from committed files.
    #[must_use]
    pub fn from_committed(
        run_id: &str,
        committed: &[CommittedFile],
        schema: ManifestSchemaRef,
    ) -> Self {
        let mut artifacts = BTreeMap::new();
        let mut checksums = BTreeMap::new();
        for file in committed {
            artifacts.insert(file.key.clone(), file.name.clone());
            checksums.insert(file.name.clone(), file.checksum.clone());
        }
        Self {
            run_id: run_id.to_string(),
            artifacts,
            checksums,
            schema,
        }
    }

    /// Canonical JSON bytes for committing.
    ///
    /// # Errors
    ///
    /// Serialization failure only.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, EtlError> {
        to_canonical_json(self)
            .map(String::into_bytes)
            .map_err(|e| EtlError::Internal(format!("manifest serialization: {e}")))
    }
}
