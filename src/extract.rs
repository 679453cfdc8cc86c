use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::blob::{paths, BlobStore, NewBlobMeta};
use crate::hashing::sha256_hex;
use crate::model::Mms;
use crate::{Error, Result};

/// Attachment counters for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub stored: u64,
    pub deduplicated: u64,
}

/// Extract every binary part of an MMS into the blob store and rewrite the
/// parts to reference their blobs.
///
/// Semantics are atomic per message: all `data` payloads are decoded before
/// anything is stored, so a single corrupt part rejects the whole MMS with
/// no blob written. Inline content types (text, vCard, SMIL) stay in place.
pub fn extract_attachments(
    mms: &mut Mms,
    store: &BlobStore,
    buf_len: usize,
) -> Result<ExtractionOutcome> {
    // Decode phase. Nothing is written until every part decodes.
    let mut decoded: Vec<(usize, Vec<u8>, String)> = Vec::new();
    for (index, part) in mms.parts.iter().enumerate() {
        let mime = part.content_type().to_string();
        if paths::is_inline_mime(&mime) {
            continue;
        }
        let Some(data) = part.data() else {
            continue;
        };
        let bytes = STANDARD
            .decode(data.as_bytes())
            .map_err(|source| Error::Base64 {
                seq: part.sequence().unwrap_or(index as u32),
                source,
            })?;
        let hash = sha256_hex(&bytes);
        decoded.push((index, bytes, hash));
    }

    // Store phase, then rewrite the part attributes in place.
    let mut outcome = ExtractionOutcome::default();
    let source_mms = mms.attributes.get("m_id").cloned();
    for (index, bytes, hash) in decoded {
        let part = &mut mms.parts[index];
        let meta = NewBlobMeta {
            mime_type: part.content_type().to_string(),
            original_name: part.original_name().map(str::to_string),
            sequence: part.sequence(),
            source_mms: source_mms.clone(),
        };
        let stored = store.store_from_reader(Some(&hash), &mut Cursor::new(bytes), meta, buf_len)?;
        if stored.is_duplicate() {
            outcome.deduplicated += 1;
        } else {
            outcome.stored += 1;
        }
        part.attributes.remove("data");
        part.attributes
            .insert("path".to_string(), stored.rel_path().to_string());
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawEntry;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn mms_with_parts(parts: Vec<BTreeMap<String, String>>) -> Mms {
        let mut raw = RawEntry::new("mms");
        raw.attributes = attrs(&[("date", "1404404903000"), ("address", "5551212")]);
        raw.parts = parts;
        Mms::from_raw(raw).unwrap()
    }

    #[test]
    fn extracts_binary_part_and_rewrites_path() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let payload = b"png bytes";
        let encoded = STANDARD.encode(payload);
        let mut mms = mms_with_parts(vec![
            attrs(&[("ct", "application/smil"), ("seq", "-1"), ("text", "<smil/>")]),
            attrs(&[
                ("ct", "image/png"),
                ("seq", "0"),
                ("fn", "duck.png"),
                ("data", encoded.as_str()),
            ]),
        ]);

        let outcome = extract_attachments(&mut mms, &store, 4096).unwrap();
        assert_eq!(outcome, ExtractionOutcome {
            stored: 1,
            deduplicated: 0
        });

        let part = &mms.parts[1];
        assert_eq!(part.data(), None);
        let hash = sha256_hex(payload);
        assert_eq!(
            part.blob_path().unwrap(),
            format!("attachments/{}/{hash}/duck.png", &hash[..2])
        );
        assert_eq!(std::fs::read(store.get_path(&hash).unwrap()).unwrap(), payload);

        // The SMIL part is untouched.
        assert_eq!(mms.parts[0].attributes["text"], "<smil/>");
        assert_eq!(mms.parts[0].blob_path(), None);
    }

    #[test]
    fn corrupt_base64_rejects_whole_mms_without_partial_blob() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let good = STANDARD.encode(b"good part");
        let mut mms = mms_with_parts(vec![
            attrs(&[("ct", "image/png"), ("seq", "0"), ("data", good.as_str())]),
            attrs(&[("ct", "image/jpeg"), ("seq", "1"), ("data", "!not base64!")]),
        ]);

        let err = extract_attachments(&mut mms, &store, 4096).unwrap_err();
        assert!(matches!(err, Error::Base64 { seq: 1, .. }));

        // Nothing was stored, not even the part that decoded.
        let good_hash = sha256_hex(b"good part");
        assert!(!store.exists(&good_hash));
        // The message still carries its data attributes for quarantine.
        assert!(mms.parts[0].data().is_some());
    }

    #[test]
    fn identical_bytes_across_messages_deduplicate() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let encoded = STANDARD.encode(b"shared photo");

        let mut first = mms_with_parts(vec![attrs(&[
            ("ct", "image/jpeg"),
            ("seq", "0"),
            ("data", encoded.as_str()),
        ])]);
        let mut second = mms_with_parts(vec![attrs(&[
            ("ct", "image/jpeg"),
            ("seq", "0"),
            ("data", encoded.as_str()),
        ])]);

        let a = extract_attachments(&mut first, &store, 4096).unwrap();
        let b = extract_attachments(&mut second, &store, 4096).unwrap();
        assert_eq!(a.stored, 1);
        assert_eq!(b.deduplicated, 1);
        assert_eq!(
            first.parts[0].blob_path().unwrap(),
            second.parts[0].blob_path().unwrap()
        );
    }

    #[test]
    fn text_parts_with_data_stay_inline() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let encoded = STANDARD.encode(b"hello");
        let mut mms = mms_with_parts(vec![attrs(&[
            ("ct", "text/plain"),
            ("seq", "0"),
            ("data", encoded.as_str()),
        ])]);

        let outcome = extract_attachments(&mut mms, &store, 4096).unwrap();
        assert_eq!(outcome, ExtractionOutcome::default());
        assert!(mms.parts[0].data().is_some());
    }

    #[test]
    fn unknown_mime_extracts_as_bin() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let encoded = STANDARD.encode(b"mystery bytes");
        let mut mms = mms_with_parts(vec![attrs(&[
            ("ct", "application/x-mystery"),
            ("seq", "0"),
            ("data", encoded.as_str()),
        ])]);

        extract_attachments(&mut mms, &store, 4096).unwrap();
        assert!(mms
            .parts[0]
            .blob_path()
            .unwrap()
            .ends_with("/attachment.bin"));
    }
}
