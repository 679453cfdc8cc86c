use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Writer;

use crate::model::{Call, Message, Mms, RawEntry};
use crate::util::write_atomic;
use crate::Result;

/// Serialize a year's calls. Output is deterministic: entries arrive
/// pre-sorted from the coalescer and attributes are written in name order,
/// so serializing the same snapshot twice is byte-identical.
pub fn render_calls(calls: &[Call]) -> Vec<u8> {
    let mut writer = document_writer();
    open_root(&mut writer, "calls", calls.len());
    for call in calls {
        empty_element(&mut writer, "call", &call.attributes);
    }
    close(writer, "calls")
}

/// Serialize a year's messages, mixing `<sms>` and `<mms>` children under
/// one `<smses>` root.
pub fn render_messages(messages: &[Message]) -> Vec<u8> {
    let mut writer = document_writer();
    open_root(&mut writer, "smses", messages.len());
    for message in messages {
        match message {
            Message::Sms(sms) => empty_element(&mut writer, "sms", &sms.attributes),
            Message::Mms(mms) => write_mms(&mut writer, mms),
        }
    }
    close(writer, "smses")
}

/// Serialize raw entries back out unchanged, for the quarantine.
pub fn render_raw_entries(root: &'static str, entries: &[RawEntry]) -> Vec<u8> {
    let mut writer = document_writer();
    open_root(&mut writer, root, entries.len());
    for entry in entries {
        if entry.parts.is_empty() {
            empty_element(&mut writer, &entry.element, &entry.attributes);
        } else {
            let elem = element_with_attributes(&entry.element, &entry.attributes);
            writer
                .write_event(Event::Start(elem))
                .expect("in-memory xml write");
            parts_block(&mut writer, &entry.parts);
            writer
                .write_event(Event::End(BytesStart::new(entry.element.as_str()).to_end()))
                .expect("in-memory xml write");
        }
    }
    close(writer, root)
}

/// Atomically rewrite a calls year file.
pub fn write_calls_year_file(path: &Path, calls: &[Call]) -> Result<()> {
    write_atomic(path, &render_calls(calls))
}

/// Atomically rewrite an sms year file.
pub fn write_messages_year_file(path: &Path, messages: &[Message]) -> Result<()> {
    write_atomic(path, &render_messages(messages))
}

fn document_writer() -> Writer<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("in-memory xml write");
    writer
}

fn open_root(writer: &mut Writer<Vec<u8>>, root: &str, count: usize) {
    let mut elem = BytesStart::new(root);
    elem.push_attribute(("count", count.to_string().as_str()));
    writer
        .write_event(Event::Start(elem))
        .expect("in-memory xml write");
}

fn close(mut writer: Writer<Vec<u8>>, root: &str) -> Vec<u8> {
    writer
        .write_event(Event::End(BytesStart::new(root).to_end()))
        .expect("in-memory xml write");
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    bytes
}

fn element_with_attributes(name: &str, attributes: &BTreeMap<String, String>) -> BytesStart<'static> {
    let mut elem = BytesStart::new(name.to_string());
    for (key, value) in attributes {
        elem.push_attribute((key.as_str(), value.as_str()));
    }
    elem
}

fn empty_element(writer: &mut Writer<Vec<u8>>, name: &str, attributes: &BTreeMap<String, String>) {
    writer
        .write_event(Event::Empty(element_with_attributes(name, attributes)))
        .expect("in-memory xml write");
}

fn write_mms(writer: &mut Writer<Vec<u8>>, mms: &Mms) {
    writer
        .write_event(Event::Start(element_with_attributes(
            "mms",
            &mms.attributes,
        )))
        .expect("in-memory xml write");
    let parts: Vec<BTreeMap<String, String>> = mms
        .parts
        .iter()
        .map(|part| part.attributes.clone())
        .collect();
    parts_block(writer, &parts);
    writer
        .write_event(Event::End(BytesStart::new("mms").to_end()))
        .expect("in-memory xml write");
}

fn parts_block(writer: &mut Writer<Vec<u8>>, parts: &[BTreeMap<String, String>]) {
    writer
        .write_event(Event::Start(BytesStart::new("parts")))
        .expect("in-memory xml write");
    for part in parts {
        empty_element(writer, "part", part);
    }
    writer
        .write_event(Event::End(BytesStart::new("parts").to_end()))
        .expect("in-memory xml write");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Kind, MmsPart, Sms};
    use crate::xml::reader::EntryReader;
    use std::io::Cursor;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn rendering_is_idempotent() {
        let calls = vec![
            Call::from_attributes(attrs(&[
                ("date", "1404404903000"),
                ("number", "5551212"),
                ("type", "1"),
            ]))
            .unwrap(),
            Call::from_attributes(attrs(&[("date", "1404404904000"), ("number", "5551213")]))
                .unwrap(),
        ];
        assert_eq!(render_calls(&calls), render_calls(&calls));
    }

    #[test]
    fn root_count_matches_children() {
        let calls = vec![
            Call::from_attributes(attrs(&[("date", "1000"), ("number", "1")])).unwrap(),
        ];
        let rendered = String::from_utf8(render_calls(&calls)).unwrap();
        assert!(rendered.contains("<calls count=\"1\">"));
    }

    #[test]
    fn escaped_values_round_trip() {
        let sms = Message::Sms(
            Sms::from_attributes(attrs(&[
                ("date", "1000"),
                ("address", "1"),
                ("body", "a < b & \"c\""),
            ]))
            .unwrap(),
        );
        let rendered = render_messages(std::slice::from_ref(&sms));
        let mut reader =
            EntryReader::new(Cursor::new(rendered), Path::new("roundtrip.xml")).unwrap();
        assert_eq!(reader.kind(), Kind::Sms);
        let entries: Vec<_> = reader.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(entries[0].attributes["body"], "a < b & \"c\"");
    }

    #[test]
    fn mms_serializes_parts_in_order() {
        let mms = Message::Mms(Mms {
            date_ms: 1000,
            attributes: attrs(&[("date", "1000"), ("address", "1")]),
            parts: vec![
                MmsPart {
                    attributes: attrs(&[("ct", "application/smil"), ("seq", "-1")]),
                },
                MmsPart {
                    attributes: attrs(&[
                        ("ct", "image/png"),
                        ("seq", "0"),
                        ("path", "attachments/ab/abcd/duck.png"),
                    ]),
                },
            ],
        });
        let rendered = String::from_utf8(render_messages(std::slice::from_ref(&mms))).unwrap();
        let smil = rendered.find("application/smil").unwrap();
        let png = rendered.find("image/png").unwrap();
        assert!(smil < png);
        assert!(rendered.contains("<smses count=\"1\">"));
        assert!(rendered.contains("path=\"attachments/ab/abcd/duck.png\""));
    }

    #[test]
    fn raw_entries_preserve_data_attribute() {
        let mut raw = RawEntry::new("mms");
        raw.attributes = attrs(&[("date", "1000"), ("address", "1")]);
        raw.parts
            .push(attrs(&[("ct", "image/png"), ("data", "!!corrupt!!")]));
        let rendered = String::from_utf8(render_raw_entries("smses", &[raw])).unwrap();
        assert!(rendered.contains("data=\"!!corrupt!!\""));
    }
}
