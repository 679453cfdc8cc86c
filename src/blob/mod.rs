use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use crate::hashing::{is_valid_hash, HashingWriter};
use crate::util::{ensure_dir, tmp_path};
use crate::{Error, Result};

pub mod metadata;
pub mod paths;

pub use metadata::{BlobMetadata, METADATA_FILE};
pub use paths::ATTACHMENTS_DIR;

static COMPUTE_TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Descriptor for a blob about to be stored.
#[derive(Debug, Clone, Default)]
pub struct NewBlobMeta {
    pub mime_type: String,
    pub original_name: Option<String>,
    pub sequence: Option<u32>,
    pub source_mms: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Blob and sidecar newly written; carries the repo-relative path.
    Stored { rel_path: String },
    /// Identical bytes were already present; nothing was written.
    Duplicate { rel_path: String },
}

impl StoreOutcome {
    pub fn rel_path(&self) -> &str {
        match self {
            StoreOutcome::Stored { rel_path } | StoreOutcome::Duplicate { rel_path } => rel_path,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreOutcome::Duplicate { .. })
    }
}

/// One enumerated blob.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub hash: String,
    pub path: PathBuf,
    pub metadata: BlobMetadata,
}

/// Hash-addressed attachment store under `<repo>/attachments`.
///
/// Blobs are immutable once written; every mutation is temp + rename inside
/// the destination hash directory, so concurrent readers never observe a
/// partial blob.
#[derive(Debug, Clone)]
pub struct BlobStore {
    repo_root: PathBuf,
}

impl BlobStore {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn attachments_root(&self) -> PathBuf {
        self.repo_root.join(ATTACHMENTS_DIR)
    }

    fn blob_dir(&self, hash: &str) -> PathBuf {
        self.repo_root.join(paths::blob_dir_rel(hash))
    }

    /// Stream bytes into the store.
    ///
    /// With `expected_hash` supplied the destination is known up front, the
    /// temp file lands inside the final hash directory, and a digest
    /// mismatch unlinks it and fails. Without it the hash is computed from
    /// the stream and the blob is moved into place afterwards.
    pub fn store_from_reader(
        &self,
        expected_hash: Option<&str>,
        reader: &mut dyn Read,
        meta: NewBlobMeta,
        buf_len: usize,
    ) -> Result<StoreOutcome> {
        match expected_hash.filter(|hash| !hash.is_empty()) {
            Some(expected) => self.store_with_known_hash(expected, reader, meta, buf_len),
            None => self.store_computing_hash(reader, meta, buf_len),
        }
    }

    fn store_with_known_hash(
        &self,
        expected: &str,
        reader: &mut dyn Read,
        meta: NewBlobMeta,
        buf_len: usize,
    ) -> Result<StoreOutcome> {
        if !is_valid_hash(expected) {
            return Err(Error::HashMismatch {
                expected: expected.to_string(),
                actual: "(malformed expected hash)".to_string(),
            });
        }
        let filename = choose_filename(&meta);
        let dir = self.blob_dir(expected);

        if let Some(existing) = self.locate_blob_file(expected)? {
            // Consume and verify the incoming stream, but never rewrite the
            // existing blob: dedup compares the sidecar size only.
            let (actual, size) = hash_stream(reader, buf_len)
                .map_err(|err| Error::io(&existing, err))?;
            if actual != expected {
                return Err(Error::HashMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
            let sidecar = BlobMetadata::load(&dir.join(METADATA_FILE)).map_err(|_| {
                Error::Corrupted {
                    hash: expected.to_string(),
                    detail: "metadata sidecar unreadable".to_string(),
                }
            })?;
            if sidecar.size != size {
                return Err(Error::Corrupted {
                    hash: expected.to_string(),
                    detail: format!(
                        "stored size {} does not match incoming size {size}",
                        sidecar.size
                    ),
                });
            }
            let rel = rel_path_string(expected, &file_name_of(&existing));
            return Ok(StoreOutcome::Duplicate { rel_path: rel });
        }

        ensure_dir(&dir)?;
        let final_path = dir.join(&filename);
        let tmp = tmp_path(&final_path);
        let (actual, size) = self.stream_to_file(reader, &tmp, buf_len)?;
        if actual != expected {
            let _ = fs::remove_file(&tmp);
            return Err(Error::HashMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        self.finish_store(expected, &filename, &dir, &tmp, &final_path, meta, size)
    }

    fn store_computing_hash(
        &self,
        reader: &mut dyn Read,
        meta: NewBlobMeta,
        buf_len: usize,
    ) -> Result<StoreOutcome> {
        let seq = COMPUTE_TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let staging = self
            .attachments_root()
            .join(format!("incoming-{}-{seq}.tmp", std::process::id()));
        ensure_dir(&self.attachments_root())?;
        let (hash, size) = self.stream_to_file(reader, &staging, buf_len)?;

        if let Some(existing) = self.locate_blob_file(&hash)? {
            let _ = fs::remove_file(&staging);
            let dir = self.blob_dir(&hash);
            let sidecar =
                BlobMetadata::load(&dir.join(METADATA_FILE)).map_err(|_| Error::Corrupted {
                    hash: hash.clone(),
                    detail: "metadata sidecar unreadable".to_string(),
                })?;
            if sidecar.size != size {
                return Err(Error::Corrupted {
                    hash: hash.clone(),
                    detail: format!(
                        "stored size {} does not match incoming size {size}",
                        sidecar.size
                    ),
                });
            }
            let rel = rel_path_string(&hash, &file_name_of(&existing));
            return Ok(StoreOutcome::Duplicate { rel_path: rel });
        }

        let filename = choose_filename(&meta);
        let dir = self.blob_dir(&hash);
        if let Err(err) = ensure_dir(&dir) {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        let final_path = dir.join(&filename);
        self.finish_store(&hash, &filename, &dir, &staging, &final_path, meta, size)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_store(
        &self,
        hash: &str,
        filename: &str,
        dir: &Path,
        tmp: &Path,
        final_path: &Path,
        meta: NewBlobMeta,
        size: u64,
    ) -> Result<StoreOutcome> {
        let sidecar = BlobMetadata {
            hash: hash.to_string(),
            mime_type: meta.mime_type,
            size,
            original_name: meta.original_name,
            sequence: meta.sequence,
            created_at: crate::time::rfc3339_millis(chrono::Utc::now()),
            source_mms: meta.source_mms,
        };
        if let Err(err) = sidecar.write(&dir.join(METADATA_FILE)) {
            let _ = fs::remove_file(tmp);
            return Err(err);
        }
        if let Err(err) = fs::rename(tmp, final_path) {
            let _ = fs::remove_file(tmp);
            return Err(Error::io(final_path, err));
        }
        tracing::debug!(
            target = "mobilecombackup",
            event = "blob_stored",
            hash = hash,
            size = size,
            file = filename
        );
        Ok(StoreOutcome::Stored {
            rel_path: rel_path_string(hash, filename),
        })
    }

    fn stream_to_file(
        &self,
        reader: &mut dyn Read,
        dest: &Path,
        buf_len: usize,
    ) -> Result<(String, u64)> {
        let file = fs::File::create(dest).map_err(|err| Error::io(dest, err))?;
        let mut writer = HashingWriter::new(file);
        let mut buf = vec![0_u8; buf_len];
        loop {
            let read = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    drop(writer);
                    let _ = fs::remove_file(dest);
                    return Err(Error::io(dest, err));
                }
            };
            if let Err(err) = writer.write_all(&buf[..read]) {
                drop(writer);
                let _ = fs::remove_file(dest);
                return Err(Error::io(dest, err));
            }
        }
        let (mut file, hash, size) = writer.finalize();
        if let Err(err) = file.sync_all() {
            drop(file);
            let _ = fs::remove_file(dest);
            return Err(Error::io(dest, err));
        }
        Ok((hash, size))
    }

    /// Absolute path of the stored blob file for `hash`.
    pub fn get_path(&self, hash: &str) -> Result<PathBuf> {
        let Some(path) = self.locate_blob_file(hash)? else {
            return Err(Error::BlobNotFound(hash.to_string()));
        };
        let sidecar_path = self.blob_dir(hash).join(METADATA_FILE);
        BlobMetadata::load(&sidecar_path).map_err(|_| Error::Corrupted {
            hash: hash.to_string(),
            detail: "metadata sidecar unreadable".to_string(),
        })?;
        Ok(path)
    }

    /// Whether a blob file for `hash` is present. Never errors for a
    /// well-formed hash.
    pub fn exists(&self, hash: &str) -> bool {
        self.locate_blob_file(hash).ok().flatten().is_some()
    }

    /// Lazily walk every stored blob. Ordering is unspecified.
    pub fn enumerate(&self) -> Result<impl Iterator<Item = Result<BlobRecord>> + '_> {
        let root = self.attachments_root();
        let mut shard_dirs = Vec::new();
        if root.is_dir() {
            for entry in fs::read_dir(&root).map_err(|err| Error::io(&root, err))? {
                let entry = entry.map_err(|err| Error::io(&root, err))?;
                if entry.path().is_dir() {
                    shard_dirs.push(entry.path());
                }
            }
        }
        Ok(BlobIter {
            shard_dirs,
            current: Vec::new(),
        })
    }

    fn locate_blob_file(&self, hash: &str) -> Result<Option<PathBuf>> {
        if !is_valid_hash(hash) {
            return Ok(None);
        }
        let dir = self.blob_dir(hash);
        if !dir.is_dir() {
            return Ok(None);
        }
        blob_file_in_dir(&dir)
    }
}

struct BlobIter {
    shard_dirs: Vec<PathBuf>,
    current: Vec<PathBuf>,
}

impl Iterator for BlobIter {
    type Item = Result<BlobRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hash_dir) = self.current.pop() {
                let Some(hash) = hash_dir
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                else {
                    continue;
                };
                if !is_valid_hash(&hash) {
                    continue;
                }
                return Some(record_for(&hash, &hash_dir));
            }
            let shard = self.shard_dirs.pop()?;
            match fs::read_dir(&shard) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        if entry.path().is_dir() {
                            self.current.push(entry.path());
                        }
                    }
                }
                Err(err) => return Some(Err(Error::io(&shard, err))),
            }
        }
    }
}

fn record_for(hash: &str, hash_dir: &Path) -> Result<BlobRecord> {
    let metadata =
        BlobMetadata::load(&hash_dir.join(METADATA_FILE)).map_err(|_| Error::Corrupted {
            hash: hash.to_string(),
            detail: "metadata sidecar missing or unreadable".to_string(),
        })?;
    let path = blob_file_in_dir(hash_dir)?.ok_or_else(|| Error::Corrupted {
        hash: hash.to_string(),
        detail: "blob file missing".to_string(),
    })?;
    Ok(BlobRecord {
        hash: hash.to_string(),
        path,
        metadata,
    })
}

fn hash_stream(reader: &mut dyn Read, buf_len: usize) -> std::io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; buf_len];
    let mut total = 0_u64;
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        total += read as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), total))
}

fn choose_filename(meta: &NewBlobMeta) -> String {
    meta.original_name
        .as_deref()
        .and_then(paths::sanitize_filename)
        .unwrap_or_else(|| paths::fallback_filename(&meta.mime_type))
}

fn rel_path_string(hash: &str, filename: &str) -> String {
    format!(
        "{ATTACHMENTS_DIR}/{}/{hash}/{filename}",
        paths::shard_of(hash)
    )
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The single data file inside a hash directory: anything that is not the
/// sidecar and not a leftover temp.
fn blob_file_in_dir(dir: &Path) -> Result<Option<PathBuf>> {
    for entry in fs::read_dir(dir).map_err(|err| Error::io(dir, err))? {
        let entry = entry.map_err(|err| Error::io(dir, err))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == METADATA_FILE || name.ends_with(crate::util::TMP_SUFFIX) {
            continue;
        }
        if entry.path().is_file() {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}
