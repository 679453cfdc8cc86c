//! Content-addressed coalescing repository for phone backups.
//!
//! The engine ingests vendor-exported call-log and SMS/MMS XML dumps,
//! deduplicates entries across overlapping backups by canonical SHA-256,
//! partitions them into per-UTC-year XML files, extracts MMS attachments
//! into a hash-addressed blob store, and keeps a `files.yaml` manifest that
//! permits offline integrity validation and idempotent re-import.
//!
//! The CLI, progress rendering, and packaging live elsewhere; callers drive
//! this crate through [`repo::Repository`], [`import::import`],
//! [`validate::validate`], and [`autofix::autofix`], injecting an
//! [`ops::Reporter`] sink and an [`ops::CancellationToken`].

pub mod autofix;
pub mod blob;
pub mod coalesce;
pub mod config;
pub mod contacts;
mod error;
pub mod extract;
pub mod hashing;
pub mod import;
pub mod logging;
pub mod model;
pub mod ops;
pub mod repo;
pub mod time;
pub mod util;
pub mod validate;
pub mod xml;

pub use autofix::{autofix, AutofixOptions, AutofixReport};
pub use config::Config;
pub use error::{Error, Result};
pub use import::{import, ImportSummary};
pub use ops::{CancellationToken, NullReporter, OperationKind, Reporter};
pub use repo::{InitOptions, Repository};
pub use validate::{validate, ValidationOptions, ValidationReport};
