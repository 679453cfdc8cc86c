use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::write_atomic;
use crate::{Error, Result};

pub const METADATA_FILE: &str = "metadata.yaml";

/// Sidecar describing one stored blob. Written once, next to the blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub hash: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_mms: Option<String>,
}

impl BlobMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|err| Error::io(path, err))?;
        serde_yaml::from_slice(&bytes).map_err(|err| Error::yaml(path, err))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = serde_yaml::to_string(self).map_err(|err| Error::yaml(path, err))?;
        write_atomic(path, bytes.as_bytes())
    }
}
