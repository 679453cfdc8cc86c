use std::fs;
use std::path::{Path, PathBuf};

use crate::blob::BlobStore;
use crate::config::Config;
use crate::contacts::ContactsBook;
use crate::model::Kind;
use crate::ops::CancellationToken;
use crate::util::ensure_dir;
use crate::{Error, Result};

pub mod manifest;
pub mod marker;
pub mod summary;

pub use crate::contacts::CONTACTS_FILE;
pub use manifest::{Manifest, ManifestEntry, MANIFEST_CHECKSUM_FILE, MANIFEST_FILE};
pub use marker::{Marker, MARKER_FILE, REPOSITORY_STRUCTURE_VERSION};
pub use summary::{KindCounts, Summary, SUMMARY_FILE};

pub const REJECTED_DIR: &str = "rejected";

/// The directories every repository carries.
pub const REQUIRED_DIRS: &[&str] = &["calls", "sms", crate::blob::ATTACHMENTS_DIR];

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Permit initializing into a directory that already has contents.
    pub allow_nonempty: bool,
}

/// Handle to an opened repository root. Opening verifies the marker, so a
/// `Repository` value always points at a directory that claims version 1.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Open an existing repository, gated on the version-1 marker.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        Marker::load(&root)?;
        Ok(Self { root })
    }

    /// Create a new repository: directory skeleton, marker, empty contacts
    /// and summary, and the initial manifest pair.
    pub fn init(
        root: impl Into<PathBuf>,
        created_by: &str,
        options: &InitOptions,
        config: &Config,
    ) -> Result<Self> {
        let root = root.into();
        if root.join(MARKER_FILE).exists() {
            return Err(Error::RepositoryExists(root));
        }
        if root.exists() && !options.allow_nonempty {
            let mut entries =
                fs::read_dir(&root).map_err(|err| Error::io(&root, err))?;
            if entries.next().is_some() {
                return Err(Error::DirectoryNotEmpty(root));
            }
        }
        ensure_dir(&root)?;
        for dir in REQUIRED_DIRS {
            ensure_dir(&root.join(dir))?;
        }
        Marker::new(created_by).write(&root)?;
        ContactsBook::write_empty(&root.join(CONTACTS_FILE))?;
        Summary::default().write(&root)?;
        manifest::regenerate(&root, config, &CancellationToken::new())?;

        tracing::info!(
            target = "mobilecombackup",
            event = "repo_init",
            path = %root.display(),
            created_by = created_by
        );
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn marker(&self) -> Result<Marker> {
        Marker::load(&self.root)
    }

    pub fn blob_store(&self) -> BlobStore {
        BlobStore::new(&self.root)
    }

    pub fn contacts_path(&self) -> PathBuf {
        self.root.join(CONTACTS_FILE)
    }

    pub fn kind_dir(&self, kind: Kind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn year_file_path(&self, kind: Kind, year: i32) -> PathBuf {
        self.kind_dir(kind).join(kind.year_file_name(year))
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.root.join(REJECTED_DIR)
    }

    /// Year partition files currently on disk for one kind, ascending by
    /// year. File names that do not match the partition shape are ignored.
    pub fn year_files(&self, kind: Kind) -> Result<Vec<(i32, PathBuf)>> {
        let dir = self.kind_dir(kind);
        let mut files = Vec::new();
        if !dir.is_dir() {
            return Ok(files);
        }
        for entry in fs::read_dir(&dir).map_err(|err| Error::io(&dir, err))? {
            let entry = entry.map_err(|err| Error::io(&dir, err))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(year) = kind.year_of_file_name(name) {
                files.push((year, entry.path()));
            }
        }
        files.sort_by_key(|(year, _)| *year);
        Ok(files)
    }

    /// Every year file across both kinds, for summary regeneration.
    pub fn all_year_files(&self) -> Result<Vec<(Kind, i32, PathBuf)>> {
        let mut all = Vec::new();
        for kind in [Kind::Calls, Kind::Sms] {
            for (year, path) in self.year_files(kind)? {
                all.push((kind, year, path));
            }
        }
        Ok(all)
    }
}
