use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::blob::{BlobStore, METADATA_FILE};
use crate::config::Config;
use crate::hashing::{is_valid_hash, sha256_file};
use crate::validate::violation::{Violation, ViolationType};
use crate::{Error, Result};

/// One blob directory queued for verification.
#[derive(Debug, Clone)]
pub struct BlobJob {
    pub hash: String,
    pub dir: PathBuf,
    pub rel_file: Option<String>,
}

/// Stage 5, sequential part: every message blob reference resolves, every
/// blob directory carries its sidecar, and (opt-in) every blob is
/// referenced. Returns the jobs for the deep re-hash stage.
pub fn check_cross_references(
    root: &Path,
    refs: &[String],
    check_orphans: bool,
) -> (Vec<Violation>, Vec<BlobJob>) {
    let mut violations = Vec::new();

    for reference in refs {
        if reference.split('/').any(|component| component == "..") {
            violations.push(Violation::error(
                ViolationType::InvalidFormat,
                reference.clone(),
                "attachment reference escapes the repository",
            ));
            continue;
        }
        if !root.join(reference).is_file() {
            violations.push(Violation::error(
                ViolationType::MissingFile,
                reference.clone(),
                "message references an attachment that does not exist",
            ));
        }
    }

    let referenced: HashSet<&str> = refs.iter().map(String::as_str).collect();
    let mut jobs = Vec::new();
    for (hash, dir) in blob_dirs(root) {
        let sidecar = dir.join(METADATA_FILE);
        if !sidecar.is_file() {
            violations.push(Violation::error(
                ViolationType::MissingFile,
                rel_name(root, &sidecar),
                "blob is missing its metadata sidecar",
            ));
        }
        let blob_file = data_file_in(&dir);
        let rel_file = blob_file.as_deref().map(|file| rel_name(root, file));
        match &rel_file {
            Some(rel) => {
                if check_orphans && !referenced.contains(rel.as_str()) {
                    violations.push(Violation::warning(
                        ViolationType::OrphanedAttachment,
                        rel.clone(),
                        "blob is not referenced by any message",
                    ));
                }
            }
            None => violations.push(Violation::error(
                ViolationType::MissingFile,
                rel_name(root, &dir),
                "blob directory has no data file",
            )),
        }
        jobs.push(BlobJob {
            hash,
            dir,
            rel_file,
        });
    }

    (violations, jobs)
}

/// Stage 6 for one blob: the directory name must equal the SHA-256 of the
/// blob file's bytes.
pub fn deep_check_blob(root: &Path, config: &Config, job: &BlobJob) -> Vec<Violation> {
    let Some(rel_file) = &job.rel_file else {
        // Already reported by the cross-reference stage.
        return Vec::new();
    };
    match sha256_file(&root.join(rel_file.as_str()), config.hash_buf_bytes) {
        Ok(actual) => {
            if actual != job.hash {
                vec![Violation::error(
                    ViolationType::ChecksumMismatch,
                    rel_file.clone(),
                    "blob content does not match its hash directory",
                )
                .with_expected(job.hash.clone())
                .with_actual(actual)]
            } else {
                Vec::new()
            }
        }
        Err(err) => vec![Violation::error(
            ViolationType::InvalidFormat,
            rel_file.clone(),
            format!("blob is unreadable: {err}"),
        )],
    }
}

/// Delete every blob no message references. This is the explicit, opt-in
/// removal path; validation only ever reports orphans as warnings.
/// Returns the removed hashes.
pub fn remove_orphan_blobs(root: &Path, refs: &HashSet<String>) -> Result<Vec<String>> {
    let store = BlobStore::new(root);
    let mut removed = Vec::new();
    for record in store.enumerate()? {
        let record = match record {
            Ok(record) => record,
            // Broken blob directories are a validator finding, not ours.
            Err(_) => continue,
        };
        let rel = rel_name(root, &record.path);
        if refs.contains(&rel) {
            continue;
        }
        let dir = record
            .path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Corrupted {
                hash: record.hash.clone(),
                detail: "blob file has no parent directory".to_string(),
            })?;
        fs::remove_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
        tracing::info!(
            target = "mobilecombackup",
            event = "orphan_blob_removed",
            hash = record.hash.as_str()
        );
        removed.push(record.hash);
    }
    removed.sort();
    Ok(removed)
}

fn blob_dirs(root: &Path) -> Vec<(String, PathBuf)> {
    let attachments = root.join(crate::blob::ATTACHMENTS_DIR);
    let mut dirs = Vec::new();
    let Ok(shards) = fs::read_dir(&attachments) else {
        return dirs;
    };
    for shard in shards.flatten() {
        if !shard.path().is_dir() {
            continue;
        }
        let Ok(hashes) = fs::read_dir(shard.path()) else {
            continue;
        };
        for entry in hashes.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_valid_hash(name) {
                dirs.push((name.to_string(), entry.path()));
            }
        }
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    dirs
}

fn data_file_in(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == METADATA_FILE || name.ends_with(crate::util::TMP_SUFFIX) {
            continue;
        }
        if entry.path().is_file() {
            return Some(entry.path());
        }
    }
    None
}

fn rel_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
