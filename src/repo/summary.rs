use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model::Kind;
use crate::util::write_atomic;
use crate::xml::open_source;
use crate::{Error, Result};

pub const SUMMARY_FILE: &str = "summary.yaml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    #[serde(default)]
    pub calls: u64,
    #[serde(default)]
    pub sms: u64,
}

/// Aggregate entry counts, total and per year. The year map is a `BTreeMap`
/// so the breakdown always serializes in ascending year order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub counts: KindCounts,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub years: BTreeMap<i32, KindCounts>,
}

impl Summary {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SUMMARY_FILE);
        let bytes = fs::read(&path).map_err(|err| Error::io(&path, err))?;
        serde_yaml::from_slice(&bytes).map_err(|err| Error::yaml(&path, err))
    }

    pub fn write(&self, root: &Path) -> Result<()> {
        let path = root.join(SUMMARY_FILE);
        let rendered = serde_yaml::to_string(self).map_err(|err| Error::yaml(&path, err))?;
        write_atomic(&path, rendered.as_bytes())
    }
}

/// Recompute the summary by counting actual entries in every year file.
/// The `count` attributes are never trusted on input.
pub fn regenerate(
    root: &Path,
    year_files: &[(Kind, i32, std::path::PathBuf)],
    config: &Config,
) -> Result<Summary> {
    let mut summary = Summary::default();
    for (kind, year, path) in year_files {
        let mut count = 0_u64;
        for entry in open_source(path, config)? {
            entry?;
            count += 1;
        }
        let per_year = summary.years.entry(*year).or_default();
        match kind {
            Kind::Calls => {
                per_year.calls += count;
                summary.counts.calls += count;
            }
            Kind::Sms => {
                per_year.sms += count;
                summary.counts.sms += count;
            }
        }
    }
    Ok(summary)
}
