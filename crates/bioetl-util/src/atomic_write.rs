//! Atomic file writes: temp file in the target directory, write, fsync,
//! atomic rename onto the final path.
//!
//! `tempfile::NamedTempFile::persist` uses the OS replace primitive on both
//! POSIX (`rename(2)`) and Windows, so a reader never observes a partially
//! written file at the final path.

use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tempfile::NamedTempFile;

/// Atomically write `bytes` to `path`, creating parent directories.
pub fn write_bytes_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory: {parent}"))?;
    }

    let dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary file in: {dir}"))?;

    temp.write_all(bytes)
        .with_context(|| format!("failed to write temporary file for: {path}"))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to fsync temporary file for: {path}"))?;

    temp.persist(path.as_std_path())
        .map_err(|e| anyhow::anyhow!(e.error))
        .with_context(|| format!("failed to atomically rename onto: {path}"))?;

    Ok(())
}

/// Atomically write UTF-8 `content` to `path`.
pub fn write_text_atomic(path: &Utf8Path, content: &str) -> Result<()> {
    write_bytes_atomic(path, content.as_bytes())
}
