use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::write_atomic;
use crate::{Error, Result};

pub const MARKER_FILE: &str = ".mobilecombackup.yaml";
pub const REPOSITORY_STRUCTURE_VERSION: &str = "1";

/// The marker document whose presence defines a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub repository_structure_version: String,
    pub created_at: String,
    pub created_by: String,
}

impl Marker {
    pub fn new(created_by: &str) -> Self {
        Self {
            repository_structure_version: REPOSITORY_STRUCTURE_VERSION.to_string(),
            created_at: crate::time::rfc3339_millis(chrono::Utc::now()),
            created_by: created_by.to_string(),
        }
    }

    /// Read the marker for `root`, failing if it is absent, unparseable,
    /// or carries a version this engine does not understand.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(MARKER_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MarkerMissing(root.to_path_buf()))
            }
            Err(err) => return Err(Error::io(&path, err)),
        };
        let marker: Marker =
            serde_yaml::from_slice(&bytes).map_err(|err| Error::yaml(&path, err))?;
        if marker.repository_structure_version != REPOSITORY_STRUCTURE_VERSION {
            return Err(Error::UnsupportedVersion(
                marker.repository_structure_version,
            ));
        }
        Ok(marker)
    }

    pub fn write(&self, root: &Path) -> Result<()> {
        let path = root.join(MARKER_FILE);
        let rendered = serde_yaml::to_string(self).map_err(|err| Error::yaml(&path, err))?;
        write_atomic(&path, rendered.as_bytes())
    }
}
