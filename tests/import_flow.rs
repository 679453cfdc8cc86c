use std::fs;
use std::path::{Path, PathBuf};

use mobilecombackup::repo::{manifest, InitOptions, Repository, Summary};
use mobilecombackup::{import, CancellationToken, Config, Error, NullReporter};
use tempfile::tempdir;

fn init_repo(base: &Path) -> Repository {
    Repository::init(
        base.join("repo"),
        "mobilecombackup-test",
        &InitOptions::default(),
        &Config::default(),
    )
    .expect("init repo")
}

fn write_source(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write source");
    path
}

// 3 calls (2014, 2014, 2015) and 2 messages (2015, 2016). The 2015 SMS sits
// exactly on the UTC year boundary.
const CALLS_SOURCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<calls count="3">
  <call number="5551212" date="1404404903000" duration="5" type="1" contact_name="Alice"/>
  <call number="5551213" date="1409400000000" duration="0" type="3" contact_name="null"/>
  <call number="5551214" date="1433116800000" duration="12" type="2"/>
</calls>"#;

const SMS_SOURCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<smses count="2">
  <sms address="5551212" date="1420070400000" type="1" body="happy new year" contact_name="Alice"/>
  <sms address="5559999" date="1470000000000" type="2" body="null"/>
</smses>"#;

fn import_fixture(repo: &Repository, sources_dir: &Path) -> mobilecombackup::ImportSummary {
    let calls = write_source(sources_dir, "calls-backup.xml", CALLS_SOURCE);
    let sms = write_source(sources_dir, "sms-backup.xml", SMS_SOURCE);
    import(
        repo,
        &[calls, sms],
        &Config::default(),
        &NullReporter,
        &CancellationToken::new(),
    )
    .expect("import")
}

#[test]
fn empty_repo_single_source_partitions_by_year() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    let summary = import_fixture(&repo, dir.path());

    assert_eq!(summary.total_added(), 5);
    assert_eq!(summary.total_duplicates(), 0);
    assert_eq!(summary.total_rejected(), 0);
    assert_eq!(summary.calls[&2014].added, 2);
    assert_eq!(summary.calls[&2015].added, 1);
    assert_eq!(summary.sms[&2015].added, 1);
    assert_eq!(summary.sms[&2016].added, 1);

    for (file, count) in [
        ("calls/calls-2014.xml", 2),
        ("calls/calls-2015.xml", 1),
        ("sms/sms-2015.xml", 1),
        ("sms/sms-2016.xml", 1),
    ] {
        let text = fs::read_to_string(repo.root().join(file)).expect(file);
        let marker = format!("count=\"{count}\"");
        assert!(text.contains(&marker), "{file} should carry {marker}");
    }

    let listed = manifest::load(repo.root()).unwrap();
    let names: Vec<_> = listed.files.iter().map(|e| e.file.as_str()).collect();
    assert_eq!(
        names,
        vec![
            ".mobilecombackup.yaml",
            "calls/calls-2014.xml",
            "calls/calls-2015.xml",
            "contacts.yaml",
            "sms/sms-2015.xml",
            "sms/sms-2016.xml",
            "summary.yaml",
        ]
    );

    let totals = Summary::load(repo.root()).unwrap();
    assert_eq!(totals.counts.calls, 3);
    assert_eq!(totals.counts.sms, 2);
    assert_eq!(totals.years[&2014].calls, 2);
    assert_eq!(totals.years[&2015].calls, 1);
    assert_eq!(totals.years[&2015].sms, 1);
    assert_eq!(totals.years[&2016].sms, 1);
}

#[test]
fn reimport_is_a_byte_identical_noop() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    import_fixture(&repo, dir.path());

    let year_files = [
        "calls/calls-2014.xml",
        "calls/calls-2015.xml",
        "sms/sms-2015.xml",
        "sms/sms-2016.xml",
    ];
    let before: Vec<Vec<u8>> = year_files
        .iter()
        .map(|file| fs::read(repo.root().join(file)).unwrap())
        .collect();
    let manifest_before = fs::read(repo.root().join("files.yaml")).unwrap();

    let summary = import_fixture(&repo, dir.path());
    assert_eq!(summary.total_added(), 0);
    assert_eq!(summary.total_duplicates(), 5);

    for (file, old) in year_files.iter().zip(before) {
        let new = fs::read(repo.root().join(file)).unwrap();
        assert_eq!(new, old, "{file} must be untouched by a re-import");
    }
    let manifest_after = fs::read(repo.root().join("files.yaml")).unwrap();
    assert_eq!(manifest_after, manifest_before);
}

#[test]
fn stats_invariants_hold_across_overlapping_sources() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    import_fixture(&repo, dir.path());

    // A second backup overlapping one 2014 call and adding one new.
    let overlap = write_source(
        dir.path(),
        "calls-overlap.xml",
        r#"<calls count="2">
  <call number="5551212" date="1404404903000" duration="5" type="1" contact_name="Alice"/>
  <call number="5550000" date="1404500000000" duration="3" type="1"/>
</calls>"#,
    );
    let summary = import(
        &repo,
        &[overlap],
        &Config::default(),
        &NullReporter,
        &CancellationToken::new(),
    )
    .unwrap();

    let stat = &summary.calls[&2014];
    assert_eq!(stat.initial, 2);
    assert_eq!(stat.added, 1);
    assert_eq!(stat.duplicates, 1);
    assert_eq!(stat.final_count, 3);
    assert_eq!(stat.initial + stat.added, stat.final_count);

    let text = fs::read_to_string(repo.root().join("calls/calls-2014.xml")).unwrap();
    assert!(text.contains("count=\"3\""));
}

#[test]
fn mismatched_multi_address_message_is_rejected() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    let source = write_source(
        dir.path(),
        "sms-group.xml",
        r#"<smses count="2">
  <sms address="555~556" date="1420070400000" type="1" body="group" contact_name="Alice"/>
  <sms address="557" date="1420070401000" type="1" body="fine" contact_name="Bob"/>
</smses>"#,
    );

    let summary = import(
        &repo,
        &[source],
        &Config::default(),
        &NullReporter,
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(summary.rejected_messages, 1);
    assert_eq!(summary.sms[&2015].added, 1);

    let rejected_dir = repo.root().join("rejected/sms");
    let quarantined: Vec<_> = fs::read_dir(&rejected_dir).unwrap().flatten().collect();
    assert_eq!(quarantined.len(), 1);
    let text = fs::read_to_string(quarantined[0].path()).unwrap();
    assert!(text.contains("address=\"555~556\""));
    assert!(!text.contains("557"));
}

#[test]
fn entries_with_bad_timestamps_are_quarantined_not_fatal() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    let source = write_source(
        dir.path(),
        "calls-damaged.xml",
        r#"<calls count="3">
  <call number="1" date="-5" type="1"/>
  <call number="2" date="sometime" type="1"/>
  <call number="3" date="1404404903000" type="1"/>
</calls>"#,
    );

    let summary = import(
        &repo,
        &[source],
        &Config::default(),
        &NullReporter,
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(summary.rejected_calls, 2);
    assert_eq!(summary.calls[&2014].added, 1);
    assert!(repo.root().join("rejected/calls").is_dir());
}

#[test]
fn unknown_contacts_accumulate_sorted() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    import_fixture(&repo, dir.path());

    let text = fs::read_to_string(repo.contacts_path()).unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
    let unprocessed = doc["unprocessed"].as_sequence().unwrap();
    assert_eq!(unprocessed.len(), 1);
    assert_eq!(unprocessed[0]["phone_number"].as_str(), Some("5551212"));
    assert_eq!(unprocessed[0]["contact_names"][0].as_str(), Some("Alice"));
}

#[test]
fn unreadable_source_is_skipped_not_fatal() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    let good = write_source(
        dir.path(),
        "calls-good.xml",
        r#"<calls count="1"><call number="1" date="1404404903000" type="1"/></calls>"#,
    );
    let missing = dir.path().join("not-there.xml");

    let summary = import(
        &repo,
        &[missing, good],
        &Config::default(),
        &NullReporter,
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(summary.total_added(), 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("not-there.xml"));
}

#[test]
fn import_gate_rejects_invalid_repository() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    // Corrupt the repository after opening the handle.
    fs::remove_file(repo.root().join("files.yaml")).unwrap();

    let source = write_source(
        dir.path(),
        "calls.xml",
        r#"<calls count="1"><call number="1" date="1404404903000" type="1"/></calls>"#,
    );
    let err = import(
        &repo,
        &[source.clone()],
        &Config::default(),
        &NullReporter,
        &CancellationToken::new(),
    )
    .unwrap_err();

    assert!(matches!(err, Error::RepositoryInvalid { .. }));
    // Fail-fast: no year file was created.
    assert!(repo.year_files(mobilecombackup::model::Kind::Calls).unwrap().is_empty());
}

#[test]
fn cancelled_token_aborts_import() {
    let dir = tempdir().unwrap();
    let repo = init_repo(dir.path());
    let source = write_source(
        dir.path(),
        "calls.xml",
        r#"<calls count="1"><call number="1" date="1404404903000" type="1"/></calls>"#,
    );
    let token = CancellationToken::new();
    token.cancel();

    let err = import(
        &repo,
        &[source],
        &Config::default(),
        &NullReporter,
        &token,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
