use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::contacts::ContactsBook;
use crate::ops::{CancellationToken, OperationKind, Reporter};
use crate::repo::{
    manifest, marker::Marker, summary, CONTACTS_FILE, MANIFEST_CHECKSUM_FILE, MANIFEST_FILE,
    MARKER_FILE, REQUIRED_DIRS, SUMMARY_FILE,
};
use crate::validate::{content, ValidationReport, Violation, ViolationType};
use crate::xml::open_source;
use crate::{Error, Result};

pub const REASON_CHECKSUM: &str = "checksum mismatches are never repaired; they may be corruption";
pub const REASON_ORPHAN: &str = "orphaned attachments are only removed by the explicit sweep";
pub const REASON_INVALID_FORMAT: &str = "malformed content cannot be rewritten safely";
pub const REASON_EXTRA_FILE: &str = "extra files are left for the operator to resolve";
pub const REASON_UNFIXABLE_FILE: &str = "file contents cannot be recreated";
pub const REASON_UNFIXABLE_STRUCTURE: &str = "only missing required directories are created";

#[derive(Debug, Clone)]
pub struct AutofixOptions {
    /// Plan and permission-check only; mutate nothing.
    pub dry_run: bool,
    /// Producer string for a recreated marker.
    pub created_by: String,
}

impl Default for AutofixOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            created_by: format!("mobilecombackup/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// One repaired (or planned) violation.
#[derive(Debug, Clone)]
pub struct FixedViolation {
    pub violation: Violation,
    pub action: String,
}

/// One violation the engine refused to touch, with its fixed reason.
#[derive(Debug, Clone)]
pub struct SkippedViolation {
    pub violation: Violation,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct AutofixReport {
    pub fixed: Vec<FixedViolation>,
    pub skipped: Vec<SkippedViolation>,
    /// Per-violation failures; the engine keeps going past them.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    WriteMarker,
    WriteContacts,
    WriteSummary,
    RegenerateManifest,
    CreateDir(String),
    RewriteCount(String),
}

impl Plan {
    fn describe(&self) -> String {
        match self {
            Plan::WriteMarker => "create repository marker with defaults".to_string(),
            Plan::WriteContacts => "create empty contacts.yaml".to_string(),
            Plan::WriteSummary => "regenerate summary.yaml from year files".to_string(),
            Plan::RegenerateManifest => "regenerate files.yaml and its checksum".to_string(),
            Plan::CreateDir(dir) => format!("create directory {dir}/"),
            Plan::RewriteCount(file) => format!("rewrite count attribute of {file}"),
        }
    }

    fn target(&self, root: &Path) -> PathBuf {
        match self {
            Plan::WriteMarker => root.join(MARKER_FILE),
            Plan::WriteContacts => root.join(CONTACTS_FILE),
            Plan::WriteSummary => root.join(SUMMARY_FILE),
            Plan::RegenerateManifest => root.join(MANIFEST_FILE),
            Plan::CreateDir(dir) => root.join(dir),
            Plan::RewriteCount(file) => root.join(file),
        }
    }
}

/// Repair the safe subset of a validation report's violations.
///
/// Anything outside the safe set is returned as skipped with a fixed
/// reason. Failures of individual fixes land in `errors`; the engine is
/// best-effort and transactional only per violation.
pub fn autofix(
    root: &Path,
    report: &ValidationReport,
    options: &AutofixOptions,
    config: &Config,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<AutofixReport> {
    reporter.start_operation(OperationKind::Autofix, &root.display().to_string());
    let mut out = AutofixReport::default();
    let mut manifest_planned = false;
    let mut touched_tracked_file = false;

    for violation in &report.violations {
        cancel.checkpoint()?;
        let plan = match plan_for(violation) {
            Ok(plan) => plan,
            Err(reason) => {
                out.skipped.push(SkippedViolation {
                    violation: violation.clone(),
                    reason,
                });
                continue;
            }
        };
        // The manifest is regenerated whole; one pass covers every size or
        // manifest-file violation.
        if plan == Plan::RegenerateManifest {
            if manifest_planned {
                continue;
            }
            manifest_planned = true;
        }

        if options.dry_run {
            match probe_writable(&plan.target(root)) {
                Ok(()) => out.fixed.push(FixedViolation {
                    violation: violation.clone(),
                    action: format!("would {}", plan.describe()),
                }),
                Err(reason) => out.errors.push(format!(
                    "{}: {reason}",
                    plan.target(root).display()
                )),
            }
            continue;
        }

        match apply(root, &plan, options, config, cancel) {
            Ok(()) => {
                if !matches!(plan, Plan::CreateDir(_)) {
                    touched_tracked_file = true;
                }
                tracing::info!(
                    target = "mobilecombackup",
                    event = "autofix_applied",
                    action = plan.describe().as_str(),
                    file = violation.file.as_str()
                );
                out.fixed.push(FixedViolation {
                    violation: violation.clone(),
                    action: plan.describe(),
                });
            }
            Err(err) => out.errors.push(format!("{}: {err}", violation.file)),
        }
    }

    // Repairs change tracked bytes, so the manifest must follow or the next
    // validation would flag the fixes themselves.
    if !options.dry_run && touched_tracked_file && !manifest_planned {
        if let Err(err) = manifest::regenerate(root, config, cancel) {
            out.errors.push(format!("{MANIFEST_FILE}: {err}"));
        }
    }

    reporter.complete_operation(
        out.errors.is_empty(),
        &format!(
            "fixed {}, skipped {}, errors {}",
            out.fixed.len(),
            out.skipped.len(),
            out.errors.len()
        ),
    );
    Ok(out)
}

fn plan_for(violation: &Violation) -> std::result::Result<Plan, &'static str> {
    match violation.violation_type {
        ViolationType::MissingMarkerFile => Ok(Plan::WriteMarker),
        ViolationType::MissingFile => match violation.file.as_str() {
            MARKER_FILE => Ok(Plan::WriteMarker),
            CONTACTS_FILE => Ok(Plan::WriteContacts),
            SUMMARY_FILE => Ok(Plan::WriteSummary),
            MANIFEST_FILE | MANIFEST_CHECKSUM_FILE => Ok(Plan::RegenerateManifest),
            _ => Err(REASON_UNFIXABLE_FILE),
        },
        ViolationType::StructureViolation => {
            let dir = violation.file.as_str();
            if REQUIRED_DIRS.contains(&dir) {
                Ok(Plan::CreateDir(dir.to_string()))
            } else {
                Err(REASON_UNFIXABLE_STRUCTURE)
            }
        }
        ViolationType::CountMismatch => Ok(Plan::RewriteCount(violation.file.clone())),
        ViolationType::SizeMismatch => Ok(Plan::RegenerateManifest),
        ViolationType::ChecksumMismatch => Err(REASON_CHECKSUM),
        ViolationType::OrphanedAttachment => Err(REASON_ORPHAN),
        ViolationType::InvalidFormat => Err(REASON_INVALID_FORMAT),
        ViolationType::ExtraFile => Err(REASON_EXTRA_FILE),
    }
}

fn apply(
    root: &Path,
    plan: &Plan,
    options: &AutofixOptions,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    match plan {
        Plan::WriteMarker => Marker::new(&options.created_by).write(root),
        Plan::WriteContacts => ContactsBook::write_empty(&root.join(CONTACTS_FILE)),
        Plan::WriteSummary => {
            let jobs = content::year_file_jobs(root);
            summary::regenerate(root, &jobs, config)?.write(root)
        }
        Plan::RegenerateManifest => manifest::regenerate(root, config, cancel).map(|_| ()),
        Plan::CreateDir(dir) => crate::util::ensure_dir(&root.join(dir)),
        Plan::RewriteCount(file) => rewrite_count_attribute(&root.join(file), config),
    }
}

/// Set the root `count` attribute to the actual child count, leaving every
/// other byte of the document alone.
fn rewrite_count_attribute(path: &Path, config: &Config) -> Result<()> {
    let mut actual = 0_u64;
    for entry in open_source(path, config)? {
        entry?;
        actual += 1;
    }

    let text = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    let rewritten = replace_root_count(&text, actual).ok_or_else(|| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "root element has no recognizable open tag",
        ),
    })?;
    crate::util::write_atomic(path, rewritten.as_bytes())
}

fn replace_root_count(text: &str, actual: u64) -> Option<String> {
    // The root open tag is the first `<` followed by a letter, which skips
    // the declaration, comments, and processing instructions.
    let mut tag_start = None;
    let bytes = text.as_bytes();
    for (index, window) in bytes.windows(2).enumerate() {
        if window[0] == b'<' && window[1].is_ascii_alphabetic() {
            tag_start = Some(index);
            break;
        }
    }
    let tag_start = tag_start?;
    let tag_end = tag_start + text[tag_start..].find('>')?;
    let tag = &text[tag_start..tag_end];

    let replacement = if let Some(count_pos) = tag.find("count=") {
        let value_start = tag_start + count_pos + "count=".len();
        let quote = bytes.get(value_start).copied()?;
        if quote != b'"' && quote != b'\'' {
            return None;
        }
        let value_end =
            value_start + 1 + text[value_start + 1..].find(quote as char)?;
        let mut out = String::with_capacity(text.len());
        out.push_str(&text[..value_start + 1]);
        out.push_str(&actual.to_string());
        out.push_str(&text[value_end..]);
        out
    } else {
        let insert_at = if tag.ends_with('/') { tag_end - 1 } else { tag_end };
        let mut out = String::with_capacity(text.len() + 16);
        out.push_str(&text[..insert_at]);
        out.push_str(&format!(" count=\"{actual}\""));
        out.push_str(&text[insert_at..]);
        out
    };
    Some(replacement)
}

/// Dry-run probe: the target's nearest existing ancestor (and the target
/// itself, if present) must be writable.
fn probe_writable(target: &Path) -> std::result::Result<(), String> {
    let mut probe = target;
    let existing = loop {
        if probe.exists() {
            break probe;
        }
        match probe.parent() {
            Some(parent) if parent.as_os_str().is_empty() => break Path::new("."),
            Some(parent) => probe = parent,
            None => break Path::new("."),
        }
    };
    let meta = fs::metadata(existing).map_err(|err| format!("unreadable: {err}"))?;
    if meta.permissions().readonly() {
        return Err(format!("{} is not writable", existing.display()));
    }
    Ok(())
}
