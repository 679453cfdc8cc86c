use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

pub const TMP_SUFFIX: &str = ".tmp";

/// Sibling temp path for an atomic write; same directory so rename never
/// crosses filesystems.
pub fn tmp_path(final_path: &Path) -> PathBuf {
    let mut s = OsString::from(final_path.as_os_str());
    s.push(TMP_SUFFIX);
    PathBuf::from(s)
}

/// Write `bytes` to `path` via temp file + rename. The temp file is removed
/// on any failure, so a crash leaves either the old file or no file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp).map_err(|err| Error::io(&tmp, err))?;
    let write_result = file
        .write_all(bytes)
        .and_then(|_| file.flush())
        .and_then(|_| file.sync_all());
    if let Err(err) = write_result {
        drop(file);
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(&tmp, err));
    }
    drop(file);
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(path, err));
    }
    Ok(())
}

/// Create a directory and all of its parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|err| Error::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tmp_path_appends_suffix() {
        let tmp = tmp_path(Path::new("/repo/files.yaml"));
        assert_eq!(tmp, Path::new("/repo/files.yaml.tmp"));
    }

    #[test]
    fn write_atomic_replaces_existing_contents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("doc.yaml");
        fs::write(&target, b"old").unwrap();

        write_atomic(&target, b"new").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!tmp_path(&target).exists());
    }

    #[test]
    fn write_atomic_fails_without_parent_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("missing-parent").join("doc.yaml");

        let err = write_atomic(&target, b"data").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
