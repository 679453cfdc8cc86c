use std::collections::BTreeSet;
use std::path::{Component, Path};

use walkdir::WalkDir;

use crate::config::Config;
use crate::hashing::sha256_file;
use crate::repo::manifest::{
    self, is_tracked, Manifest, ManifestEntry, MANIFEST_CHECKSUM_FILE, MANIFEST_FILE,
};
use crate::validate::violation::{Violation, ViolationType};

/// Sequential part of stage 3: manifest presence, its own checksum, and the
/// completeness comparison against the tracked set on disk. Returns the
/// entries for the parallel per-file verification.
pub fn check_manifest_sync(root: &Path, config: &Config) -> (Vec<Violation>, Vec<ManifestEntry>) {
    let mut violations = Vec::new();

    if !root.join(MANIFEST_FILE).is_file() {
        violations.push(Violation::error(
            ViolationType::MissingFile,
            MANIFEST_FILE,
            "manifest is missing",
        ));
        return (violations, Vec::new());
    }
    if !root.join(MANIFEST_CHECKSUM_FILE).is_file() {
        violations.push(Violation::error(
            ViolationType::MissingFile,
            MANIFEST_CHECKSUM_FILE,
            "manifest checksum file is missing",
        ));
    } else {
        match (
            sha256_file(&root.join(MANIFEST_FILE), config.hash_buf_bytes),
            manifest::load_checksum(root),
        ) {
            (Ok(actual), Ok(recorded)) => {
                if actual != recorded {
                    violations.push(
                        Violation::error(
                            ViolationType::ChecksumMismatch,
                            MANIFEST_FILE,
                            "manifest does not match its recorded checksum",
                        )
                        .with_expected(recorded)
                        .with_actual(actual),
                    );
                }
            }
            (Err(err), _) | (_, Err(err)) => violations.push(Violation::error(
                ViolationType::InvalidFormat,
                MANIFEST_CHECKSUM_FILE,
                format!("manifest checksum is unreadable: {err}"),
            )),
        }
    }

    let listed = match manifest::load(root) {
        Ok(manifest) => manifest,
        Err(err) => {
            violations.push(Violation::error(
                ViolationType::InvalidFormat,
                MANIFEST_FILE,
                format!("manifest is unparseable: {err}"),
            ));
            return (violations, Vec::new());
        }
    };

    violations.extend(check_completeness(root, &listed));
    (violations, listed.files)
}

/// Files present on disk and tracked, but absent from the manifest.
fn check_completeness(root: &Path, listed: &Manifest) -> Vec<Violation> {
    let listed_set: BTreeSet<&str> = listed.files.iter().map(|entry| entry.file.as_str()).collect();
    let mut violations = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = rel_string(root, entry.path()) else {
            continue;
        };
        if !is_tracked(&rel) {
            continue;
        }
        if !listed_set.contains(rel.as_str()) {
            violations.push(Violation::error(
                ViolationType::ExtraFile,
                rel,
                "file exists on disk but is not listed in the manifest",
            ));
        }
    }
    violations
}

/// Parallel part of stage 3: one listed file's existence, size, and digest.
pub fn check_manifest_entry(root: &Path, config: &Config, entry: &ManifestEntry) -> Vec<Violation> {
    let path = root.join(&entry.file);
    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(_) => {
            return vec![Violation::error(
                ViolationType::MissingFile,
                entry.file.clone(),
                "file listed in the manifest is missing from disk",
            )]
        }
    };
    let mut violations = Vec::new();
    if meta.len() != entry.size_bytes {
        violations.push(
            Violation::error(
                ViolationType::SizeMismatch,
                entry.file.clone(),
                "file size differs from the manifest",
            )
            .with_expected(entry.size_bytes.to_string())
            .with_actual(meta.len().to_string()),
        );
    }
    match sha256_file(&path, config.hash_buf_bytes) {
        Ok(actual) => {
            if actual != entry.sha256 {
                violations.push(
                    Violation::error(
                        ViolationType::ChecksumMismatch,
                        entry.file.clone(),
                        "file content differs from the manifest",
                    )
                    .with_expected(entry.sha256.clone())
                    .with_actual(actual),
                );
            }
        }
        Err(err) => violations.push(Violation::error(
            ViolationType::InvalidFormat,
            entry.file.clone(),
            format!("file is unreadable: {err}"),
        )),
    }
    violations
}

fn rel_string(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(os) => parts.push(os.to_str()?.to_string()),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}
