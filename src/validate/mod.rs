use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::ops::{CancellationToken, OperationKind, Reporter};
use crate::repo::manifest as repo_manifest;
use crate::repo::Repository;
use crate::Result;

pub mod attachments;
pub mod content;
pub mod manifest;
pub mod structure;
pub mod violation;

pub use violation::{RepoStatus, Severity, ValidationReport, Violation, ViolationType};

/// Knobs for a validation run. Both deep modes default off; the
/// cross-reference stage itself always runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions {
    /// Re-hash every blob and compare against its directory name.
    pub deep_attachments: bool,
    /// Report blobs no message references (warnings).
    pub check_orphans: bool,
}

/// Run the staged validation. Findings are collected, never fatal; the only
/// error a caller sees from a validation run is cancellation or an
/// unreadable root.
pub fn validate(
    root: &Path,
    options: &ValidationOptions,
    config: &Config,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<ValidationReport> {
    reporter.start_operation(OperationKind::Validate, &root.display().to_string());
    let result = run_stages(root, options, config, reporter, cancel);
    match &result {
        Ok(report) => reporter.complete_operation(
            report.is_valid(),
            &format!("{} violation(s)", report.violations.len()),
        ),
        Err(err) => reporter.complete_operation(false, &err.to_string()),
    }
    result
}

fn run_stages(
    root: &Path,
    options: &ValidationOptions,
    config: &Config,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<ValidationReport> {
    let mut violations = Vec::new();

    // Stages 1 and 2 are cheap and sequential.
    violations.extend(structure::check_structure(root));
    let (marker_violations, marker_ok) = structure::check_marker(root);
    violations.extend(marker_violations);
    cancel.checkpoint()?;

    // Without a usable marker this is not a repository; later stages would
    // only pile noise onto the report.
    if !marker_ok {
        return Ok(ValidationReport::from_violations(violations));
    }

    // Stage 3: manifest soundness, fanned out over the listed files.
    let (manifest_violations, entries) = manifest::check_manifest_sync(root, config);
    violations.extend(manifest_violations);
    let outputs = run_parallel(
        entries,
        config.validate_workers,
        cancel,
        reporter,
        |entry| manifest::check_manifest_entry(root, config, &entry),
    )?;
    violations.extend(outputs.into_iter().flatten());

    // Stage 4: year-file content, fanned out per file; blob references
    // fall out of the same pass.
    let jobs = content::year_file_jobs(root);
    let outputs = run_parallel(
        jobs,
        config.validate_workers,
        cancel,
        reporter,
        |(kind, year, path)| content::check_year_file(root, kind, year, &path, config),
    )?;
    let mut refs = Vec::new();
    for (stage_violations, stage_refs) in outputs {
        violations.extend(stage_violations);
        refs.extend(stage_refs);
    }

    // Stage 5: cross-references between messages and blobs.
    let (xref_violations, blob_jobs) =
        attachments::check_cross_references(root, &refs, options.check_orphans);
    violations.extend(xref_violations);
    cancel.checkpoint()?;

    // Stage 6 (opt-in): deep re-hash of every blob.
    if options.deep_attachments {
        let outputs = run_parallel(
            blob_jobs,
            config.validate_workers,
            cancel,
            reporter,
            |job| attachments::deep_check_blob(root, config, &job),
        )?;
        violations.extend(outputs.into_iter().flatten());
    }

    Ok(ValidationReport::from_violations(violations))
}

/// Collect every blob reference embedded in the sms year files. Used by the
/// orphan sweep; validation gathers the same set during stage 4.
pub fn collect_blob_refs(repo: &Repository, config: &Config) -> Result<HashSet<String>> {
    let mut refs = HashSet::new();
    for (kind, year, path) in repo.all_year_files()? {
        if kind != crate::model::Kind::Sms {
            continue;
        }
        let (_, file_refs) = content::check_year_file(repo.root(), kind, year, &path, config);
        refs.extend(file_refs);
    }
    Ok(refs)
}

/// The explicit, opt-in orphan sweep: delete unreferenced blobs and bring
/// the manifest back in line. Returns the removed hashes.
pub fn remove_orphans(
    repo: &Repository,
    config: &Config,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    reporter.start_operation(OperationKind::OrphanSweep, &repo.root().display().to_string());
    let refs = collect_blob_refs(repo, config)?;
    cancel.checkpoint()?;
    let removed = attachments::remove_orphan_blobs(repo.root(), &refs)?;
    if !removed.is_empty() {
        repo_manifest::regenerate(repo.root(), config, cancel)?;
    }
    reporter.complete_operation(true, &format!("removed {} blob(s)", removed.len()));
    Ok(removed)
}

/// Bounded worker pool with channel fan-in: jobs go out over one channel,
/// outputs come back over another, and the collector runs on the calling
/// thread. Workers poll the cancellation token between jobs.
fn run_parallel<J, O, F>(
    jobs: Vec<J>,
    workers: usize,
    cancel: &CancellationToken,
    reporter: &dyn Reporter,
    work: F,
) -> Result<Vec<O>>
where
    J: Send,
    O: Send,
    F: Fn(J) -> O + Sync,
{
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    let total = jobs.len() as u64;
    let workers = workers.clamp(1, jobs.len());

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<J>();
    let (out_tx, out_rx) = crossbeam_channel::bounded::<O>(workers * 2);
    for job in jobs {
        // Receiver is alive until the end of the scope below.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let mut outputs = Vec::with_capacity(total as usize);
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let out_tx = out_tx.clone();
            let work = &work;
            let cancel = cancel.clone();
            scope.spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if out_tx.send(work(job)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_tx);

        let mut done = 0_u64;
        while let Ok(output) = out_rx.recv() {
            outputs.push(output);
            done += 1;
            reporter.report_progress(done, total);
        }
    });

    cancel.checkpoint()?;
    Ok(outputs)
}
