use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::coalesce::Coalescer;
use crate::config::Config;
use crate::contacts::ContactsBook;
use crate::extract::extract_attachments;
use crate::model::{Call, Kind, Message, Mms, RawEntry, Sms};
use crate::ops::{CancellationToken, NullReporter, OperationKind, Reporter};
use crate::repo::{manifest, summary, Repository};
use crate::time::year_of_timestamp_ms;
use crate::util::ensure_dir;
use crate::validate::{validate, ValidationOptions};
use crate::xml::{open_source, write_calls_year_file, write_messages_year_file};
use crate::{Error, Result};

pub mod reject;
pub mod stats;

pub use reject::write_quarantine;
pub use stats::{ImportSummary, YearStat};

const CANCEL_CHECK_INTERVAL: u64 = 64;
const REQUIRED_FREE_MULTIPLIER: f64 = 1.2;

/// Run a full import: validate the repository, stream every source through
/// the per-entry pipeline, rewrite dirtied year partitions, and bring
/// contacts, summary, and manifest back into agreement.
///
/// Re-importing the same sources is a no-op: zero entries added and the
/// manifest bytes unchanged.
pub fn import(
    repo: &Repository,
    sources: &[PathBuf],
    config: &Config,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    reporter.start_operation(OperationKind::Import, &repo.root().display().to_string());
    let result = run_import(repo, sources, config, reporter, cancel);
    match &result {
        Ok(summary) => reporter.complete_operation(
            true,
            &format!(
                "added {}, duplicates {}, rejected {}",
                summary.total_added(),
                summary.total_duplicates(),
                summary.total_rejected()
            ),
        ),
        Err(err) => reporter.complete_operation(false, &err.to_string()),
    }
    result
}

fn run_import(
    repo: &Repository,
    sources: &[PathBuf],
    config: &Config,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    // Fail-fast gate: the same validation as the validate operation, no
    // short-circuit. No source is read against an invalid repository.
    let report = validate(
        repo.root(),
        &ValidationOptions::default(),
        config,
        &NullReporter,
        cancel,
    )?;
    let errors = report.error_count();
    if errors > 0 {
        return Err(Error::RepositoryInvalid { errors });
    }

    preflight_disk(repo, sources)?;

    let mut ordered: Vec<&PathBuf> = sources.iter().collect();
    ordered.sort();

    let mut state = ImportState::new(repo, config, cancel)?;
    let total = ordered.len() as u64;
    for (index, source) in ordered.into_iter().enumerate() {
        cancel.checkpoint()?;
        state.process_source(source)?;
        reporter.report_progress(index as u64 + 1, total);
    }
    state.finish()
}

/// Source bytes must fit with headroom before any side effect happens.
fn preflight_disk(repo: &Repository, sources: &[PathBuf]) -> Result<()> {
    let total: u64 = sources
        .iter()
        .filter_map(|source| fs::metadata(source).ok())
        .map(|meta| meta.len())
        .sum();
    let needed = (total as f64 * REQUIRED_FREE_MULTIPLIER) as u64;
    let available = fs2::available_space(repo.root())
        .map_err(|err| Error::io(repo.root(), err))?;
    if available < needed {
        return Err(Error::InsufficientDisk { needed, available });
    }
    Ok(())
}

struct ImportState<'a> {
    repo: &'a Repository,
    config: &'a Config,
    cancel: &'a CancellationToken,
    store: crate::blob::BlobStore,
    contacts: ContactsBook,
    calls: BTreeMap<i32, Coalescer<Call>>,
    messages: BTreeMap<i32, Coalescer<Message>>,
    summary: ImportSummary,
}

impl<'a> ImportState<'a> {
    fn new(repo: &'a Repository, config: &'a Config, cancel: &'a CancellationToken) -> Result<Self> {
        Ok(Self {
            repo,
            config,
            cancel,
            store: repo.blob_store(),
            contacts: ContactsBook::load(&repo.contacts_path())?,
            calls: BTreeMap::new(),
            messages: BTreeMap::new(),
            summary: ImportSummary::default(),
        })
    }

    fn process_source(&mut self, source: &Path) -> Result<()> {
        let reader = match open_source(source, self.config) {
            Ok(reader) => reader,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                // Per-file failures are local: record, skip, move on.
                self.record_source_error(source, &err);
                return Ok(());
            }
        };
        let kind = reader.kind();
        let mut rejected: Vec<RawEntry> = Vec::new();
        let mut processed = 0_u64;

        for item in reader {
            processed += 1;
            if processed % CANCEL_CHECK_INTERVAL == 0 {
                self.cancel.checkpoint()?;
            }
            let raw = match item {
                Ok(raw) => raw,
                Err(err) => {
                    // Structural XML failure ends this source; entries read
                    // so far stand.
                    self.record_source_error(source, &err);
                    break;
                }
            };
            match self.process_entry(kind, raw.clone()) {
                Ok(()) => {}
                Err(err) if err.is_entry_local() => {
                    tracing::warn!(
                        target = "mobilecombackup",
                        event = "entry_rejected",
                        kind = kind.as_str(),
                        source = %source.display(),
                        error = %err
                    );
                    rejected.push(raw);
                    self.summary.record_rejection(kind);
                }
                Err(err) => return Err(err),
            }
        }

        if !rejected.is_empty() {
            write_quarantine(self.repo, kind, source, &rejected)?;
        }
        Ok(())
    }

    fn process_entry(&mut self, kind: Kind, raw: RawEntry) -> Result<()> {
        match kind {
            Kind::Calls => self.process_call(raw),
            Kind::Sms => self.process_message(raw),
        }
    }

    fn process_call(&mut self, raw: RawEntry) -> Result<()> {
        let call = Call::from_attributes(raw.attributes)?;
        let year = year_of_timestamp_ms(call.date_ms)?;
        self.prime_calls(year)?;
        let coalescer = self.calls.entry(year).or_default();
        coalescer.add(call);
        Ok(())
    }

    fn process_message(&mut self, raw: RawEntry) -> Result<()> {
        let message = match raw.element.as_str() {
            "mms" => {
                let mut mms = Mms::from_raw(raw)?;
                let outcome = extract_attachments(&mut mms, &self.store, self.config.hash_buf_bytes)?;
                self.summary.attachments_added += outcome.stored;
                self.summary.attachments_deduplicated += outcome.deduplicated;
                Message::Mms(mms)
            }
            _ => Message::Sms(Sms::from_attributes(raw.attributes)?),
        };
        self.contacts
            .observe_message(message.address(), message.contact_name())?;
        let year = year_of_timestamp_ms(message.date_ms())?;
        self.prime_messages(year)?;
        let coalescer = self.messages.entry(year).or_default();
        coalescer.add(message);
        Ok(())
    }

    fn prime_calls(&mut self, year: i32) -> Result<()> {
        if self.calls.contains_key(&year) {
            return Ok(());
        }
        let mut coalescer = Coalescer::new();
        let path = self.repo.year_file_path(Kind::Calls, year);
        if path.is_file() {
            let mut existing = Vec::new();
            for item in open_source(&path, self.config)? {
                existing.push(Call::from_attributes(item?.attributes)?);
            }
            coalescer.load_existing(existing);
        }
        self.calls.insert(year, coalescer);
        Ok(())
    }

    fn prime_messages(&mut self, year: i32) -> Result<()> {
        if self.messages.contains_key(&year) {
            return Ok(());
        }
        let mut coalescer = Coalescer::new();
        let path = self.repo.year_file_path(Kind::Sms, year);
        if path.is_file() {
            let mut existing = Vec::new();
            for item in open_source(&path, self.config)? {
                let raw = item?;
                let message = match raw.element.as_str() {
                    "mms" => Message::Mms(Mms::from_raw(raw)?),
                    _ => Message::Sms(Sms::from_attributes(raw.attributes)?),
                };
                existing.push(message);
            }
            coalescer.load_existing(existing);
        }
        self.messages.insert(year, coalescer);
        Ok(())
    }

    fn record_source_error(&mut self, source: &Path, err: &Error) {
        tracing::warn!(
            target = "mobilecombackup",
            event = "source_skipped",
            source = %source.display(),
            error = %err
        );
        self.summary
            .errors
            .push(format!("{}: {err}", source.display()));
    }

    fn finish(mut self) -> Result<ImportSummary> {
        for (year, coalescer) in std::mem::take(&mut self.calls) {
            self.cancel.checkpoint()?;
            self.summary.calls.insert(year, stat_of(&coalescer));
            if coalescer.is_dirty() {
                ensure_dir(&self.repo.kind_dir(Kind::Calls))?;
                let path = self.repo.year_file_path(Kind::Calls, year);
                write_calls_year_file(&path, &coalescer.snapshot())?;
            }
        }
        for (year, coalescer) in std::mem::take(&mut self.messages) {
            self.cancel.checkpoint()?;
            self.summary.sms.insert(year, stat_of(&coalescer));
            if coalescer.is_dirty() {
                ensure_dir(&self.repo.kind_dir(Kind::Sms))?;
                let path = self.repo.year_file_path(Kind::Sms, year);
                write_messages_year_file(&path, &coalescer.snapshot())?;
            }
        }

        if self.contacts.is_dirty() {
            self.contacts.save(&self.repo.contacts_path())?;
        }

        let regenerated = summary::regenerate(
            self.repo.root(),
            &self.repo.all_year_files()?,
            self.config,
        )?;
        regenerated.write(self.repo.root())?;

        // The manifest is always regenerated whole, never merged.
        manifest::regenerate(self.repo.root(), self.config, self.cancel)?;

        tracing::info!(
            target = "mobilecombackup",
            event = "import_complete",
            added = self.summary.total_added(),
            duplicates = self.summary.total_duplicates(),
            rejected = self.summary.total_rejected(),
            attachments_added = self.summary.attachments_added
        );
        Ok(self.summary)
    }
}

fn stat_of<T: crate::model::Entry>(coalescer: &Coalescer<T>) -> YearStat {
    YearStat {
        initial: coalescer.initial(),
        added: coalescer.added(),
        duplicates: coalescer.duplicates(),
        final_count: coalescer.len() as u64,
    }
}
