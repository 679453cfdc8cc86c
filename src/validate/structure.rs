use std::fs;
use std::path::Path;

use crate::repo::marker::{Marker, MARKER_FILE, REPOSITORY_STRUCTURE_VERSION};
use crate::repo::{
    CONTACTS_FILE, MANIFEST_CHECKSUM_FILE, MANIFEST_FILE, REJECTED_DIR, REQUIRED_DIRS,
    SUMMARY_FILE,
};
use crate::util::TMP_SUFFIX;
use crate::validate::violation::{Violation, ViolationType};
use crate::Error;

const EXPECTED_TOP_FILES: &[&str] = &[
    MARKER_FILE,
    CONTACTS_FILE,
    SUMMARY_FILE,
    MANIFEST_FILE,
    MANIFEST_CHECKSUM_FILE,
];

/// Stage 1: the directory skeleton.
pub fn check_structure(root: &Path) -> Vec<Violation> {
    let mut violations = Vec::new();
    for dir in REQUIRED_DIRS {
        if !root.join(dir).is_dir() {
            violations.push(Violation::error(
                ViolationType::StructureViolation,
                *dir,
                format!("required directory {dir}/ is missing"),
            ));
        }
    }

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            violations.push(Violation::error(
                ViolationType::StructureViolation,
                root.display().to_string(),
                format!("repository root is unreadable: {err}"),
            ));
            return violations;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') && name != MARKER_FILE {
            continue;
        }
        if name.ends_with(TMP_SUFFIX) {
            continue;
        }
        let is_dir = entry.path().is_dir();
        if is_dir {
            if !REQUIRED_DIRS.contains(&name) && name != REJECTED_DIR {
                violations.push(Violation::warning(
                    ViolationType::StructureViolation,
                    name,
                    format!("unexpected top-level directory {name}/"),
                ));
            }
        } else if !EXPECTED_TOP_FILES.contains(&name) {
            violations.push(Violation::warning(
                ViolationType::StructureViolation,
                name,
                format!("unexpected top-level file {name}"),
            ));
        }
    }
    violations
}

/// Stage 2: the repository marker. Returns the violations plus whether the
/// marker is good enough for later stages to proceed.
pub fn check_marker(root: &Path) -> (Vec<Violation>, bool) {
    match Marker::load(root) {
        Ok(_) => (Vec::new(), true),
        Err(Error::MarkerMissing(_)) => (
            vec![Violation::error(
                ViolationType::MissingMarkerFile,
                MARKER_FILE,
                "repository marker is missing",
            )],
            false,
        ),
        Err(Error::UnsupportedVersion(version)) => (
            vec![Violation::error(
                ViolationType::InvalidFormat,
                MARKER_FILE,
                "unsupported repository structure version",
            )
            .with_expected(REPOSITORY_STRUCTURE_VERSION)
            .with_actual(version)],
            false,
        ),
        Err(err) => (
            vec![Violation::error(
                ViolationType::InvalidFormat,
                MARKER_FILE,
                format!("marker is unreadable: {err}"),
            )],
            false,
        ),
    }
}
