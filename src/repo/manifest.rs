use std::fs;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::Config;
use crate::hashing::{sha256_file, sha256_hex};
use crate::ops::CancellationToken;
use crate::repo::marker::MARKER_FILE;
use crate::util::{write_atomic, TMP_SUFFIX};
use crate::{Error, Result};

pub const MANIFEST_FILE: &str = "files.yaml";
pub const MANIFEST_CHECKSUM_FILE: &str = "files.yaml.sha256";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// The `files.yaml` document: every tracked file with its digest and size,
/// sorted by path for deterministic output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
}

/// Whether a repository-relative path participates in the manifest.
///
/// The manifest pair itself, temp artifacts, and dotfiles are outside the
/// tracked set; the marker is the one dotfile that is tracked.
pub fn is_tracked(rel_path: &str) -> bool {
    if rel_path == MANIFEST_FILE || rel_path == MANIFEST_CHECKSUM_FILE {
        return false;
    }
    if rel_path.ends_with(TMP_SUFFIX) {
        return false;
    }
    if rel_path == MARKER_FILE {
        return true;
    }
    !rel_path
        .split('/')
        .any(|component| component.starts_with('.'))
}

/// Repository-relative path with forward slashes, or `None` for paths that
/// escape the root (never produced by the walker).
fn rel_path_string(root: &Path, path: &Path) -> Option<String> {
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

/// Walk the repository and compute the manifest. Hashing is streamed per
/// file; the token is polled between files.
pub fn generate(root: &Path, config: &Config, cancel: &CancellationToken) -> Result<Manifest> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        cancel.checkpoint()?;
        let entry = entry.map_err(|err| {
            let io = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed"));
            Error::io(root, io)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = rel_path_string(root, entry.path()) else {
            continue;
        };
        if !is_tracked(&rel) {
            continue;
        }
        let meta = entry.metadata().map_err(|err| {
            let io = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "metadata failed"));
            Error::io(entry.path(), io)
        })?;
        let sha256 = sha256_file(entry.path(), config.hash_buf_bytes)?;
        files.push(ManifestEntry {
            file: rel,
            sha256,
            size_bytes: meta.len(),
        });
    }
    files.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(Manifest { files })
}

/// Serialize and atomically install the manifest pair.
pub fn write(root: &Path, manifest: &Manifest) -> Result<()> {
    let manifest_path = root.join(MANIFEST_FILE);
    let rendered =
        serde_yaml::to_string(manifest).map_err(|err| Error::yaml(&manifest_path, err))?;
    write_atomic(&manifest_path, rendered.as_bytes())?;

    let checksum = format!("{}\n", sha256_hex(rendered.as_bytes()));
    write_atomic(&root.join(MANIFEST_CHECKSUM_FILE), checksum.as_bytes())
}

/// Regenerate both manifest files from the repository contents.
pub fn regenerate(root: &Path, config: &Config, cancel: &CancellationToken) -> Result<Manifest> {
    let manifest = generate(root, config, cancel)?;
    write(root, &manifest)?;
    Ok(manifest)
}

pub fn load(root: &Path) -> Result<Manifest> {
    let path = root.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|err| Error::io(&path, err))?;
    serde_yaml::from_slice(&bytes).map_err(|err| Error::yaml(&path, err))
}

/// The recorded checksum of `files.yaml`, trimmed of its trailing newline.
pub fn load_checksum(root: &Path) -> Result<String> {
    let path = root.join(MANIFEST_CHECKSUM_FILE);
    let text = fs::read_to_string(&path).map_err(|err| Error::io(&path, err))?;
    Ok(text.trim_end().to_string())
}
