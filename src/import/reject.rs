use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::model::{Kind, RawEntry};
use crate::repo::Repository;
use crate::util::{ensure_dir, write_atomic};
use crate::xml::render_raw_entries;
use crate::{Error, Result};

/// Write one source file's rejected entries to the quarantine.
///
/// `rejected/` (and its per-kind subdirectory) is created on demand only —
/// an import with no rejections leaves no trace. Quarantined entries carry
/// their original attributes, including any inline `data` payloads.
pub fn write_quarantine(
    repo: &Repository,
    kind: Kind,
    source: &Path,
    entries: &[RawEntry],
) -> Result<PathBuf> {
    let dir = repo.rejected_dir().join(kind.dir_name());
    ensure_dir(&dir)?;

    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    let stamp = crate::time::compact_stamp(Utc::now());
    let path = unique_quarantine_path(&dir, &stem, &stamp)?;

    let rendered = render_raw_entries(kind.root_element(), entries);
    write_atomic(&path, &rendered)?;
    tracing::warn!(
        target = "mobilecombackup",
        event = "entries_quarantined",
        kind = kind.as_str(),
        count = entries.len(),
        file = %path.display()
    );
    Ok(path)
}

fn unique_quarantine_path(dir: &Path, stem: &str, stamp: &str) -> Result<PathBuf> {
    for suffix in 0..100 {
        let candidate = if suffix == 0 {
            dir.join(format!("{stem}-{stamp}.xml"))
        } else {
            dir.join(format!("{stem}-{stamp}-{suffix:02}.xml"))
        };
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::Io {
        path: dir.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "unable to allocate quarantine file name",
        ),
    })
}
