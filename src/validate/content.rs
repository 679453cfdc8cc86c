use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::model::{Call, Kind, Mms, Sms};
use crate::time::year_of_timestamp_ms;
use crate::validate::violation::{Violation, ViolationType};
use crate::xml::open_source;

/// Discover the year files stage 4 will verify.
pub fn year_file_jobs(root: &Path) -> Vec<(Kind, i32, PathBuf)> {
    let mut jobs = Vec::new();
    for kind in [Kind::Calls, Kind::Sms] {
        let dir = root.join(kind.dir_name());
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(year) = kind.year_of_file_name(name) {
                jobs.push((kind, year, entry.path()));
            }
        }
    }
    jobs.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    jobs
}

/// Stage 4 for one year file: it parses, its `count` attribute matches the
/// real child count, and every entry's timestamp falls inside the file's
/// year. MMS blob references are collected for the cross-reference stage.
pub fn check_year_file(
    root: &Path,
    kind: Kind,
    year: i32,
    path: &Path,
    config: &Config,
) -> (Vec<Violation>, Vec<String>) {
    let rel = rel_name(root, path);
    let mut violations = Vec::new();
    let mut refs = Vec::new();

    let reader = match open_source(path, config) {
        Ok(reader) => reader,
        Err(err) => {
            violations.push(Violation::error(
                ViolationType::InvalidFormat,
                rel,
                format!("year file is unreadable: {err}"),
            ));
            return (violations, refs);
        }
    };
    if reader.kind() != kind {
        violations.push(Violation::error(
            ViolationType::InvalidFormat,
            rel.clone(),
            format!(
                "root element <{}> does not match the {} partition",
                reader.kind().root_element(),
                kind.as_str()
            ),
        ));
        return (violations, refs);
    }

    let declared = reader.declared_count();
    let mut actual = 0_u64;
    for item in reader {
        let raw = match item {
            Ok(raw) => raw,
            Err(err) => {
                violations.push(Violation::error(
                    ViolationType::InvalidFormat,
                    rel.clone(),
                    format!("year file is malformed: {err}"),
                ));
                break;
            }
        };
        actual += 1;

        let timestamp = match kind {
            Kind::Calls => Call::from_attributes(raw.attributes.clone()).map(|call| call.date_ms),
            Kind::Sms => match raw.element.as_str() {
                "mms" => Mms::from_raw(raw.clone()).map(|mms| {
                    for part in &mms.parts {
                        if let Some(blob_path) = part.blob_path() {
                            refs.push(blob_path.to_string());
                        }
                    }
                    mms.date_ms
                }),
                _ => Sms::from_attributes(raw.attributes.clone()).map(|sms| sms.date_ms),
            },
        };
        match timestamp.and_then(year_of_timestamp_ms) {
            Ok(entry_year) => {
                if entry_year != year {
                    violations.push(
                        Violation::error(
                            ViolationType::StructureViolation,
                            rel.clone(),
                            format!("entry #{actual} belongs to year {entry_year}"),
                        )
                        .with_expected(year.to_string())
                        .with_actual(entry_year.to_string()),
                    );
                }
            }
            Err(err) => violations.push(Violation::error(
                ViolationType::InvalidFormat,
                rel.clone(),
                format!("entry #{actual} has an invalid timestamp: {err}"),
            )),
        }
    }

    match declared {
        Some(declared) if declared == actual => {}
        Some(declared) => violations.push(
            Violation::error(
                ViolationType::CountMismatch,
                rel,
                "count attribute does not match the number of entries",
            )
            .with_expected(declared.to_string())
            .with_actual(actual.to_string()),
        ),
        None => violations.push(
            Violation::error(
                ViolationType::CountMismatch,
                rel,
                "count attribute is missing or unparseable",
            )
            .with_actual(actual.to_string()),
        ),
    }

    (violations, refs)
}

fn rel_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
