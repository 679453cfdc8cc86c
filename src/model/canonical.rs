use std::collections::BTreeMap;

use crate::hashing::sha256_hex;
use crate::model::{Call, Message, Mms, Sms, NULL_LITERAL};

/// Canonical rendering of one attribute value: whitespace collapses to
/// single spaces with the ends trimmed, and the `null` literal becomes
/// empty.
pub fn canonical_value(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed == NULL_LITERAL {
        return String::new();
    }
    collapsed
}

fn push_attributes(out: &mut String, attributes: &BTreeMap<String, String>, skip: &[&str]) {
    // BTreeMap iteration fixes the attribute order by name.
    for (name, raw) in attributes {
        if skip.contains(&name.as_str()) {
            continue;
        }
        let value = canonical_value(raw);
        if value.is_empty() {
            continue;
        }
        out.push_str(name);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
}

/// Canonical serialization of a call. Two structurally equivalent entries
/// from different backups render identically here, so their hashes match.
pub fn canonical_call(call: &Call) -> String {
    let mut out = String::from("call\n");
    push_attributes(&mut out, &call.attributes, &[]);
    out
}

pub fn canonical_sms(sms: &Sms) -> String {
    let mut out = String::from("sms\n");
    push_attributes(&mut out, &sms.attributes, &[]);
    out
}

/// Canonical serialization of an MMS in its post-extraction form: part
/// `data` payloads never participate, only their `path` references do.
pub fn canonical_mms(mms: &Mms) -> String {
    let mut out = String::from("mms\n");
    push_attributes(&mut out, &mms.attributes, &[]);
    for part in &mms.parts {
        out.push_str("part\n");
        push_attributes(&mut out, &part.attributes, &["data"]);
    }
    out
}

pub fn canonical_message(message: &Message) -> String {
    match message {
        Message::Sms(sms) => canonical_sms(sms),
        Message::Mms(mms) => canonical_mms(mms),
    }
}

/// Anything that can live in a year partition: it has a UTC millisecond
/// timestamp and a canonical identity hash.
pub trait Entry {
    fn timestamp_ms(&self) -> i64;
    fn canonical(&self) -> String;

    /// SHA-256 over the canonical serialization, hex encoded.
    fn entry_hash(&self) -> String {
        sha256_hex(self.canonical().as_bytes())
    }
}

impl Entry for Call {
    fn timestamp_ms(&self) -> i64 {
        self.date_ms
    }

    fn canonical(&self) -> String {
        canonical_call(self)
    }
}

impl Entry for Message {
    fn timestamp_ms(&self) -> i64 {
        self.date_ms()
    }

    fn canonical(&self) -> String {
        canonical_message(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MmsPart;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn null_empty_and_absent_hash_alike() {
        let explicit = Call::from_attributes(attrs(&[
            ("date", "100000"),
            ("number", "5551212"),
            ("contact_name", "null"),
        ]))
        .unwrap();
        let absent =
            Call::from_attributes(attrs(&[("date", "100000"), ("number", "5551212")])).unwrap();
        let empty = Call::from_attributes(attrs(&[
            ("date", "100000"),
            ("number", "5551212"),
            ("contact_name", ""),
        ]))
        .unwrap();

        assert_eq!(explicit.entry_hash(), absent.entry_hash());
        assert_eq!(empty.entry_hash(), absent.entry_hash());
    }

    #[test]
    fn whitespace_normalizes() {
        let spaced = Call::from_attributes(attrs(&[
            ("date", "100000"),
            ("contact_name", "  Jane\t \n Doe  "),
        ]))
        .unwrap();
        let tight =
            Call::from_attributes(attrs(&[("date", "100000"), ("contact_name", "Jane Doe")]))
                .unwrap();
        assert_eq!(spaced.entry_hash(), tight.entry_hash());
    }

    #[test]
    fn attribute_order_is_fixed_by_name() {
        // BTreeMap already sorts, so two insert orders collapse to one form.
        let mut a = BTreeMap::new();
        a.insert("number".to_string(), "1".to_string());
        a.insert("date".to_string(), "100000".to_string());
        let mut b = BTreeMap::new();
        b.insert("date".to_string(), "100000".to_string());
        b.insert("number".to_string(), "1".to_string());
        assert_eq!(
            Call::from_attributes(a).unwrap().entry_hash(),
            Call::from_attributes(b).unwrap().entry_hash()
        );
    }

    #[test]
    fn mms_hash_ignores_part_data_but_sees_path() {
        let base = attrs(&[("date", "100000"), ("address", "5551212")]);
        let inline = Mms {
            date_ms: 100_000,
            attributes: base.clone(),
            parts: vec![MmsPart {
                attributes: attrs(&[("ct", "image/png"), ("seq", "0"), ("data", "aGVsbG8=")]),
            }],
        };
        let extracted = Mms {
            date_ms: 100_000,
            attributes: base.clone(),
            parts: vec![MmsPart {
                attributes: attrs(&[("ct", "image/png"), ("seq", "0")]),
            }],
        };
        // Without a path the data attribute is invisible to the hash.
        assert_eq!(
            Message::Mms(inline).entry_hash(),
            Message::Mms(extracted.clone()).entry_hash()
        );

        let with_path = Mms {
            date_ms: 100_000,
            attributes: base,
            parts: vec![MmsPart {
                attributes: attrs(&[
                    ("ct", "image/png"),
                    ("seq", "0"),
                    ("path", "attachments/ab/abcd/duck.png"),
                ]),
            }],
        };
        assert_ne!(
            Message::Mms(extracted).entry_hash(),
            Message::Mms(with_path).entry_hash()
        );
    }

    #[test]
    fn sms_and_mms_with_same_fields_differ() {
        let attributes = attrs(&[("date", "100000"), ("address", "5551212")]);
        let sms = Message::Sms(Sms {
            date_ms: 100_000,
            attributes: attributes.clone(),
        });
        let mms = Message::Mms(Mms {
            date_ms: 100_000,
            attributes,
            parts: Vec::new(),
        });
        assert_ne!(sms.entry_hash(), mms.entry_hash());
    }
}
