use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the coalescing engine.
///
/// Per-entry failures during ingest never surface here directly; they are
/// quarantined and accumulated into the import summary. This enum covers the
/// errors callers observe: repository-level aborts, resource failures, and
/// the format errors attached to a quarantined entry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed xml in {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: quick_xml::Error,
    },
    #[error("malformed yaml in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("document type declarations are not allowed in {path}")]
    DtdForbidden { path: PathBuf },
    #[error("unrecognized root element <{element}> in {path}")]
    UnrecognizedRoot { path: PathBuf, element: String },
    #[error("unsupported character encoding {encoding} in {path}")]
    EncodingUnsupported { path: PathBuf, encoding: String },
    #[error("source {path} exceeds the size limit: {size} > {limit} bytes")]
    FileSizeLimitExceeded {
        path: PathBuf,
        size: u64,
        limit: u64,
    },
    #[error("invalid base64 in mms part {seq}: {source}")]
    Base64 {
        seq: u32,
        #[source]
        source: base64::DecodeError,
    },
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
    #[error("invalid value for attribute {name}: {value:?}")]
    InvalidAttribute { name: &'static str, value: String },
    #[error("address/name count mismatch: {addresses} address(es), {names} name(s)")]
    AddressMismatch { addresses: usize, names: usize },
    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("attachment path escapes the repository: {0}")]
    PathTraversal(String),
    #[error("attachment {0} not found")]
    BlobNotFound(String),
    #[error("attachment {hash} is corrupted: {detail}")]
    Corrupted { hash: String, detail: String },
    #[error("insufficient disk space: {needed} bytes needed, {available} available")]
    InsufficientDisk { needed: u64, available: u64 },
    #[error("not a repository: marker missing at {0}")]
    MarkerMissing(PathBuf),
    #[error("unsupported repository structure version {0:?}")]
    UnsupportedVersion(String),
    #[error("repository already initialized at {0}")]
    RepositoryExists(PathBuf),
    #[error("refusing to initialize non-empty directory {0}")]
    DirectoryNotEmpty(PathBuf),
    #[error("repository failed validation with {errors} error-severity violation(s)")]
    RepositoryInvalid { errors: usize },
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn xml(path: &Path, source: quick_xml::Error) -> Self {
        Error::Xml {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn yaml(path: &Path, source: serde_yaml::Error) -> Self {
        Error::Yaml {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error quarantines a single entry rather than aborting
    /// the surrounding operation.
    pub fn is_entry_local(&self) -> bool {
        matches!(
            self,
            Error::Base64 { .. }
                | Error::InvalidTimestamp(_)
                | Error::InvalidAttribute { .. }
                | Error::AddressMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_local_classification() {
        assert!(Error::InvalidTimestamp(-5).is_entry_local());
        assert!(Error::AddressMismatch {
            addresses: 2,
            names: 1
        }
        .is_entry_local());
        assert!(!Error::Cancelled.is_entry_local());
        assert!(!Error::MarkerMissing(PathBuf::from("/r")).is_entry_local());
    }
}
