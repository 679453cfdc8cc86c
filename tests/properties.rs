use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use chrono::{Datelike, TimeZone, Utc};
use mobilecombackup::coalesce::Coalescer;
use mobilecombackup::model::{canonical_value, Call, Entry, Kind};
use mobilecombackup::time::year_of_timestamp_ms;
use mobilecombackup::xml::{render_calls, EntryReader};
use proptest::prelude::*;

// Through the year 2100; the vendor formats carry nothing near the edges.
const MAX_TEST_TS: i64 = 4_102_444_800_000;

fn attr_key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,10}".prop_filter("date is set separately", |key| key != "date")
}

fn attr_value() -> impl Strategy<Value = String> {
    // XML attribute values normalize raw whitespace characters, so the
    // round-trip property is stated over values without them.
    proptest::string::string_regex("[a-zA-Z0-9 .,:~&<>'+-]{0,24}").expect("valid regex")
}

fn call_strategy() -> impl Strategy<Value = Call> {
    (
        0..MAX_TEST_TS,
        proptest::collection::btree_map(attr_key(), attr_value(), 0..6),
    )
        .prop_map(|(ts, mut attributes): (i64, BTreeMap<String, String>)| {
            attributes.insert("date".to_string(), ts.to_string());
            Call::from_attributes(attributes).expect("valid call")
        })
}

proptest! {
    #[test]
    fn hash_survives_serialize_parse_round_trip(calls in proptest::collection::vec(call_strategy(), 1..8)) {
        let rendered = render_calls(&calls);
        let mut reader = EntryReader::new(Cursor::new(rendered), Path::new("prop.xml"))
            .expect("parse rendered document");
        prop_assert_eq!(reader.kind(), Kind::Calls);

        let mut parsed = Vec::new();
        for item in reader.by_ref() {
            let raw = item.expect("entry parses");
            parsed.push(Call::from_attributes(raw.attributes).expect("call rebuilds"));
        }
        prop_assert_eq!(parsed.len(), calls.len());
        for (original, reparsed) in calls.iter().zip(&parsed) {
            prop_assert_eq!(original.entry_hash(), reparsed.entry_hash());
        }
    }

    #[test]
    fn serialization_is_deterministic(calls in proptest::collection::vec(call_strategy(), 0..8)) {
        prop_assert_eq!(render_calls(&calls), render_calls(&calls));
    }

    #[test]
    fn year_partition_agrees_with_chrono(ts in 0..MAX_TEST_TS) {
        let year = year_of_timestamp_ms(ts).expect("in range");
        let expected = Utc.timestamp_millis_opt(ts).single().expect("chrono in range").year();
        prop_assert_eq!(year, expected);
    }

    #[test]
    fn year_boundary_tiebreak_is_strict(year in 1971i32..2100) {
        let boundary = Utc
            .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date")
            .timestamp_millis();
        prop_assert_eq!(year_of_timestamp_ms(boundary).unwrap(), year);
        prop_assert_eq!(year_of_timestamp_ms(boundary - 1).unwrap(), year - 1);
    }

    #[test]
    fn canonical_value_is_idempotent(value in "\\PC{0,40}") {
        let once = canonical_value(&value);
        prop_assert_eq!(canonical_value(&once), once.clone());
    }

    #[test]
    fn coalescer_output_is_order_independent(calls in proptest::collection::vec(call_strategy(), 1..10)) {
        let mut forward = Coalescer::new();
        for call in calls.clone() {
            forward.add(call);
        }
        let mut backward = Coalescer::new();
        for call in calls.iter().rev().cloned() {
            backward.add(call);
        }
        let a: Vec<String> = forward.snapshot().iter().map(Entry::entry_hash).collect();
        let b: Vec<String> = backward.snapshot().iter().map(Entry::entry_hash).collect();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn duplicate_entries_collapse(call in call_strategy(), copies in 2usize..5) {
        let mut coalescer = Coalescer::new();
        for _ in 0..copies {
            coalescer.add(call.clone());
        }
        prop_assert_eq!(coalescer.len(), 1);
        prop_assert_eq!(coalescer.added(), 1);
        prop_assert_eq!(coalescer.duplicates(), (copies - 1) as u64);
    }
}
