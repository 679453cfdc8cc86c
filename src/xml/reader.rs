use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Reader;

use crate::config::Config;
use crate::model::{Kind, RawEntry};
use crate::{Error, Result};

/// Streaming reader over the entries of one vendor export or year file.
///
/// The document is never materialized whole: events are pulled one entry at
/// a time. DTDs are rejected outright and only UTF-8 input is accepted, for
/// every XML ingest in the system.
pub struct EntryReader<R: BufRead> {
    reader: Reader<R>,
    path: PathBuf,
    kind: Kind,
    declared_count: Option<u64>,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> std::fmt::Debug for EntryReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("declared_count", &self.declared_count)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Open a source file, enforcing the size limit before any byte is parsed,
/// and position the reader past the root element.
pub fn open_source(path: &Path, config: &Config) -> Result<EntryReader<BufReader<File>>> {
    let meta = std::fs::metadata(path).map_err(|err| Error::io(path, err))?;
    if meta.len() > config.max_source_bytes {
        return Err(Error::FileSizeLimitExceeded {
            path: path.to_path_buf(),
            size: meta.len(),
            limit: config.max_source_bytes,
        });
    }
    let file = File::open(path).map_err(|err| Error::io(path, err))?;
    EntryReader::new(BufReader::new(file), path)
}

impl<R: BufRead> EntryReader<R> {
    pub fn new(source: R, path: &Path) -> Result<Self> {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let (kind, declared_count) = read_root(&mut reader, &mut buf, path)?;
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            kind,
            declared_count,
            buf,
            finished: false,
        })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The root `count` attribute as declared by the vendor. Untrusted:
    /// callers count children themselves and the validator flags mismatches.
    pub fn declared_count(&self) -> Option<u64> {
        self.declared_count
    }

    fn next_entry(&mut self) -> Result<Option<RawEntry>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Empty(e)) => {
                    let element = element_name(&e, &self.path)?;
                    if is_entry_element(self.kind, &element) {
                        let mut entry = RawEntry::new(element);
                        entry.attributes = collect_attributes(&e, &self.path)?;
                        return Ok(Some(entry));
                    }
                    // Unknown empty child, e.g. vendor extras. Skipped.
                    tracing::debug!(
                        target = "mobilecombackup",
                        event = "xml_skip_element",
                        element = element.as_str(),
                        path = %self.path.display()
                    );
                }
                Ok(Event::Start(e)) => {
                    let element = element_name(&e, &self.path)?;
                    if element == "mms" && self.kind == Kind::Sms {
                        let attributes = collect_attributes(&e, &self.path)?;
                        let parts = self.read_mms_children()?;
                        let mut entry = RawEntry::new("mms");
                        entry.attributes = attributes;
                        entry.parts = parts;
                        return Ok(Some(entry));
                    }
                    if is_entry_element(self.kind, &element) {
                        // A non-empty call/sms element; attributes are all we
                        // keep, children are skipped.
                        let mut entry = RawEntry::new(element);
                        entry.attributes = collect_attributes(&e, &self.path)?;
                        let end = e.to_end().into_owned();
                        self.skip_subtree(end)?;
                        return Ok(Some(entry));
                    }
                    tracing::debug!(
                        target = "mobilecombackup",
                        event = "xml_skip_subtree",
                        element = element.as_str(),
                        path = %self.path.display()
                    );
                    let end = e.to_end().into_owned();
                    self.skip_subtree(end)?;
                }
                Ok(Event::End(_)) | Ok(Event::Eof) => {
                    self.finished = true;
                    return Ok(None);
                }
                Ok(Event::DocType(_)) => {
                    return Err(Error::DtdForbidden {
                        path: self.path.clone(),
                    })
                }
                Ok(_) => continue,
                Err(err) => return Err(Error::xml(&self.path, err)),
            }
        }
    }

    /// Consume the children of an open `<mms>`: the `<parts>` list is
    /// collected, anything else (address lists and so on) is skipped.
    fn read_mms_children(&mut self) -> Result<Vec<BTreeMap<String, String>>> {
        let mut parts = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let element = element_name(&e, &self.path)?;
                    if element == "parts" {
                        self.read_parts(&mut parts)?;
                    } else {
                        let end = e.to_end().into_owned();
                        let mut skip = Vec::new();
                        self.reader
                            .read_to_end_into(end.name(), &mut skip)
                            .map_err(|err| Error::xml(&self.path, err))?;
                    }
                }
                Ok(Event::Empty(_)) => continue,
                Ok(Event::End(_)) => return Ok(parts),
                Ok(Event::Eof) => {
                    return Err(Error::xml(
                        &self.path,
                        quick_xml::Error::UnexpectedEof("mms".to_string()),
                    ))
                }
                Ok(_) => continue,
                Err(err) => return Err(Error::xml(&self.path, err)),
            }
        }
    }

    fn read_parts(&mut self, parts: &mut Vec<BTreeMap<String, String>>) -> Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf) {
                Ok(Event::Empty(e)) => {
                    if element_name(&e, &self.path)? == "part" {
                        parts.push(collect_attributes(&e, &self.path)?);
                    }
                }
                Ok(Event::Start(e)) => {
                    let element = element_name(&e, &self.path)?;
                    if element == "part" {
                        parts.push(collect_attributes(&e, &self.path)?);
                    }
                    let end = e.to_end().into_owned();
                    self.skip_subtree(end)?;
                }
                Ok(Event::End(_)) => return Ok(()),
                Ok(Event::Eof) => {
                    return Err(Error::xml(
                        &self.path,
                        quick_xml::Error::UnexpectedEof("parts".to_string()),
                    ))
                }
                Ok(_) => continue,
                Err(err) => return Err(Error::xml(&self.path, err)),
            }
        }
    }

    fn skip_subtree(&mut self, end: BytesEnd<'static>) -> Result<()> {
        let mut skip = Vec::new();
        self.reader
            .read_to_end_into(end.name(), &mut skip)
            .map(|_| ())
            .map_err(|err| Error::xml(&self.path, err))
    }
}

impl<R: BufRead> Iterator for EntryReader<R> {
    type Item = Result<RawEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => {
                // Structural failures end the stream; the source is skipped
                // at the orchestrator level.
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

fn is_entry_element(kind: Kind, element: &str) -> bool {
    match kind {
        Kind::Calls => element == "call",
        Kind::Sms => element == "sms" || element == "mms",
    }
}

fn read_root<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
    path: &Path,
) -> Result<(Kind, Option<u64>)> {
    loop {
        buf.clear();
        match reader.read_event_into(buf) {
            Ok(Event::Decl(decl)) => {
                if let Some(encoding) = decl.encoding() {
                    let encoding = encoding.map_err(|err| Error::xml(path, err.into()))?;
                    if !encoding.eq_ignore_ascii_case(b"utf-8") {
                        return Err(Error::EncodingUnsupported {
                            path: path.to_path_buf(),
                            encoding: String::from_utf8_lossy(&encoding).into_owned(),
                        });
                    }
                }
            }
            Ok(Event::DocType(_)) => {
                return Err(Error::DtdForbidden {
                    path: path.to_path_buf(),
                })
            }
            Ok(Event::Start(e)) => {
                let element = element_name(&e, path)?;
                let kind = Kind::from_root_element(&element).ok_or(Error::UnrecognizedRoot {
                    path: path.to_path_buf(),
                    element: element.clone(),
                })?;
                let declared = collect_attributes(&e, path)?
                    .get("count")
                    .and_then(|value| value.parse().ok());
                return Ok((kind, declared));
            }
            Ok(Event::Eof) => {
                return Err(Error::xml(
                    path,
                    quick_xml::Error::UnexpectedEof("root element".to_string()),
                ))
            }
            Ok(_) => continue,
            Err(err) => return Err(Error::xml(path, err)),
        }
    }
}

fn element_name(e: &BytesStart<'_>, path: &Path) -> Result<String> {
    std::str::from_utf8(e.name().as_ref())
        .map(str::to_string)
        .map_err(|err| Error::xml(path, quick_xml::Error::NonDecodable(Some(err))))
}

fn collect_attributes(e: &BytesStart<'_>, path: &Path) -> Result<BTreeMap<String, String>> {
    let mut attributes = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::xml(path, err.into()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| Error::xml(path, quick_xml::Error::NonDecodable(Some(err))))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| Error::xml(path, err))?
            .into_owned();
        attributes.insert(key, value);
    }
    Ok(attributes)
}
