//! The per-file atomic write protocol and artifact-set commit.
//!
//! Per file: run-scoped temp directory → `{name}.tmp` → fsync → checksum
//! validation → atomic rename onto the final path → guaranteed cleanup of
//! stray `.tmp` files and the temp directory when empty. The writer never
//! rolls back committed files; the guarantee is per-file atomicity plus the
//! completeness validation over the whole set.

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use bioetl_util::canonical::sha256_hex;
use bioetl_util::error::{ArtifactError, EtlError};

/// One artifact queued for commit.
#[derive(Debug, Clone)]
pub struct PlannedArtifact {
    /// Canonical manifest key (`dataset`, `quality_report`, …).
    pub key: String,
    /// Final file name inside the output directory.
    pub name: String,
    pub bytes: Vec<u8>,
    /// Required artifacts participate in completeness validation.
    pub required: bool,
}

/// A committed artifact with its checksum evidence.
#[derive(Debug, Clone)]
pub struct CommittedFile {
    pub key: String,
    pub name: String,
    pub path: Utf8PathBuf,
    pub checksum: String,
    pub size: u64,
}

/// Run-scoped transactional writer.
#[derive(Debug)]
pub struct ArtifactWriter {
    output_dir: Utf8PathBuf,
    run_id: String,
}

impl ArtifactWriter {
    #[must_use]
    pub fn new(output_dir: Utf8PathBuf, run_id: impl Into<String>) -> Self {
        Self {
            output_dir,
            run_id: run_id.into(),
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    /// The run-scoped temp directory: `{output_dir}/.tmp_run_{run_id}/`.
    #[must_use]
    pub fn temp_dir(&self) -> Utf8PathBuf {
        self.output_dir.join(format!(".tmp_run_{}", self.run_id))
    }

    /// Commit one file atomically. On any failure the temp file is removed
    /// and the error propagates; the final path is either fully written or
    /// untouched.
    ///
    /// # Errors
    ///
    /// `ArtifactError::ChecksumMismatch` when `expected_checksum` is given
    /// and differs; `ArtifactError::RenameFailed` on a failed replace; I/O
    /// errors from the temp write.
    pub fn commit_file(
        &self,
        name: &str,
        bytes: &[u8],
        expected_checksum: Option<&str>,
    ) -> Result<CommittedFile, EtlError> {
        let temp_dir = self.temp_dir();
        fs::create_dir_all(&temp_dir)?;
        let temp_path = temp_dir.join(format!("{name}.tmp"));

        let result = self.commit_inner(&temp_path, name, bytes, expected_checksum);
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn commit_inner(
        &self,
        temp_path: &Utf8Path,
        name: &str,
        bytes: &[u8],
        expected_checksum: Option<&str>,
    ) -> Result<CommittedFile, EtlError> {
        {
            let mut file = fs::File::create(temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        let checksum = sha256_hex(bytes);
        if let Some(expected) = expected_checksum {
            if expected != checksum {
                return Err(EtlError::Artifact(ArtifactError::ChecksumMismatch {
                    path: temp_path.to_string(),
                    expected: expected.to_string(),
                    actual: checksum,
                }));
            }
        }

        fs::create_dir_all(&self.output_dir)?;
        let final_path = self.output_dir.join(name);
        replace_file(temp_path, &final_path).map_err(|e| {
            EtlError::Artifact(ArtifactError::RenameFailed {
                path: final_path.to_string(),
                reason: e.to_string(),
            })
        })?;

        debug!(artifact = name, checksum = %checksum, "committed artifact");
        Ok(CommittedFile {
            key: String::new(),
            name: name.to_string(),
            path: final_path,
            checksum,
            size: bytes.len() as u64,
        })
    }

    /// Commit a whole artifact set in declared order, then run the
    /// completeness validation. Cleanup of the temp directory is guaranteed
    /// on every exit path.
    ///
    /// # Errors
    ///
    /// The first commit failure, or a completeness failure afterwards.
    pub fn commit_set(
        &self,
        planned: Vec<PlannedArtifact>,
    ) -> Result<Vec<CommittedFile>, EtlError> {
        let _guard = TempDirGuard { writer: self };

        let mut committed = Vec::with_capacity(planned.len());
        for artifact in planned {
            let mut file = self.commit_file(&artifact.name, &artifact.bytes, None)?;
            file.key = artifact.key.clone();
            committed.push((artifact.required, file));
        }

        self.validate_completeness(&committed)?;
        Ok(committed.into_iter().map(|(_, f)| f).collect())
    }

    /// Every required artifact must exist at its final path with nonzero
    /// size.
    fn validate_completeness(&self, committed: &[(bool, CommittedFile)]) -> Result<(), EtlError> {
        for (required, file) in committed {
            if !*required {
                continue;
            }
            let metadata = fs::metadata(&file.path).map_err(|_| {
                EtlError::Artifact(ArtifactError::PartialArtifact {
                    path: file.path.to_string(),
                })
            })?;
            if metadata.len() == 0 {
                return Err(EtlError::Artifact(ArtifactError::EmptyArtifact {
                    path: file.path.to_string(),
                }));
            }
        }
        Ok(())
    }

    /// Remove stray `.tmp` files and the temp directory when empty.
    pub fn cleanup_temp(&self) {
        let temp_dir = self.temp_dir();
        if !temp_dir.exists() {
            return;
        }
        if let Ok(entries) = fs::read_dir(&temp_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %e, "failed to remove temp file");
                    }
                }
            }
        }
        // Only an empty directory is removed; anything else is evidence.
        let _ = fs::remove_dir(&temp_dir);
    }
}

/// Guaranteed-cleanup guard for the run temp directory.
struct TempDirGuard<'a> {
    writer: &'a ArtifactWriter,
}

impl Drop for TempDirGuard<'_> {
    fn drop(&mut self) {
        self.writer.cleanup_temp();
    }
}

/// Atomic replace. `rename(2)` replaces on POSIX; on Windows a plain rename
/// fails when the destination exists, so the destination is unlinked first
/// and the rename retried.
#[cfg(not(windows))]
fn replace_file(from: &Utf8Path, to: &Utf8Path) -> std::io::Result<()> {
    fs::rename(from, to)
}

#[cfg(windows)]
fn replace_file(from: &Utf8Path, to: &Utf8Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = fs::remove_file(to);
            fs::rename(from, to)
        }
    }
}
