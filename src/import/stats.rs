use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::Kind;

/// Per-year, per-kind import accounting. The invariants hold by
/// construction: `initial + added == final` and `added + duplicates ==
/// entries processed for that year`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct YearStat {
    pub initial: u64,
    pub added: u64,
    pub duplicates: u64,
    #[serde(rename = "final")]
    pub final_count: u64,
}

/// Result of one import run, as handed to the caller and the reporter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub calls: BTreeMap<i32, YearStat>,
    pub sms: BTreeMap<i32, YearStat>,
    pub rejected_calls: u64,
    pub rejected_messages: u64,
    pub attachments_added: u64,
    pub attachments_deduplicated: u64,
    /// Source-level failures that skipped a file without failing the run.
    pub errors: Vec<String>,
}

impl ImportSummary {
    pub fn record_rejection(&mut self, kind: Kind) {
        match kind {
            Kind::Calls => self.rejected_calls += 1,
            Kind::Sms => self.rejected_messages += 1,
        }
    }

    pub fn total_added(&self) -> u64 {
        self.calls
            .values()
            .chain(self.sms.values())
            .map(|stat| stat.added)
            .sum()
    }

    pub fn total_duplicates(&self) -> u64 {
        self.calls
            .values()
            .chain(self.sms.values())
            .map(|stat| stat.duplicates)
            .sum()
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected_calls + self.rejected_messages
    }
}
