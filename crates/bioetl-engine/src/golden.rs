//! Golden comparison: byte-exact check of committed artifacts against a
//! reference directory.

use std::fs;

use camino::Utf8Path;

use bioetl_writer::CommittedFile;

/// One mismatch between a committed artifact and its golden reference.
#[derive(Debug, Clone)]
pub struct GoldenDiff {
    pub name: String,
    pub detail: String,
}

/// Compare the deterministic artifacts (dataset and quality report) against
/// same-named files under `golden_dir`. Returns an empty list on a perfect
/// match.
#[must_use]
pub fn compare(golden_dir: &Utf8Path, committed: &[CommittedFile]) -> Vec<GoldenDiff> {
    let mut diffs = Vec::new();

    for file in committed {
        if file.key != "dataset" && file.key != "quality_report" {
            continue;
        }
        let reference = golden_dir.join(&file.name);
        let Ok(expected) = fs::read(&reference) else {
            diffs.push(GoldenDiff {
                name: file.name.clone(),
                detail: format!("missing golden reference: {reference}"),
            });
            continue;
        };
        let Ok(actual) = fs::read(&file.path) else {
            diffs.push(GoldenDiff {
                name: file.name.clone(),
                detail: "committed artifact unreadable".to_string(),
            });
            continue;
        };
        if expected != actual {
            diffs.push(GoldenDiff {
                name: file.name.clone(),
                detail: first_difference(&expected, &actual),
            });
        }
    }

    diffs
}

fn first_difference(expected: &[u8], actual: &[u8]) -> String {
    if expected.len() != actual.len() {
        return format!(
            "size differs: golden {} bytes, actual {} bytes",
            expected.len(),
            actual.len()
        );
    }
    let offset = expected
        .iter()
        .zip(actual.iter())
        .position(|(a, b)| a != b)
        .unwrap_or(0);
    format!("first differing byte at offset {offset}")
}
