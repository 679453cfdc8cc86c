use std::collections::BTreeMap;

use crate::{Error, Result};

mod canonical;

pub use canonical::{canonical_value, Entry};

/// Vendor files spell absent values as the literal string `null`.
pub const NULL_LITERAL: &str = "null";

/// The two data kinds a repository partitions by year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Calls,
    Sms,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Calls => "calls",
            Kind::Sms => "sms",
        }
    }

    /// Subdirectory holding this kind's year files.
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }

    /// Root element of a vendor export or year file.
    pub fn root_element(&self) -> &'static str {
        match self {
            Kind::Calls => "calls",
            Kind::Sms => "smses",
        }
    }

    pub fn from_root_element(name: &str) -> Option<Kind> {
        match name {
            "calls" => Some(Kind::Calls),
            "smses" => Some(Kind::Sms),
            _ => None,
        }
    }

    /// `calls-2015.xml` style file name for a year partition.
    pub fn year_file_name(&self, year: i32) -> String {
        format!("{}-{year}.xml", self.as_str())
    }

    /// Parse the year out of a partition file name, if it has the
    /// expected `<kind>-<YYYY>.xml` shape.
    pub fn year_of_file_name(&self, file_name: &str) -> Option<i32> {
        let stem = file_name.strip_suffix(".xml")?;
        let digits = stem.strip_prefix(self.as_str())?.strip_prefix('-')?;
        if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

/// Call direction/type codes as the vendor emits them. Unknown codes are
/// preserved verbatim and never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
    Voicemail,
    Rejected,
    Refused,
    Blocked,
    Unknown,
}

impl CallType {
    pub fn from_code(code: &str) -> CallType {
        match code {
            "1" => CallType::Incoming,
            "2" => CallType::Outgoing,
            "3" => CallType::Missed,
            "4" => CallType::Voicemail,
            "5" => CallType::Rejected,
            "6" => CallType::Refused,
            "7" => CallType::Blocked,
            _ => CallType::Unknown,
        }
    }
}

/// SMS message box codes. Unknown codes are preserved verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsType {
    Received,
    Sent,
    Draft,
    Outbox,
    Failed,
    Unknown,
}

impl SmsType {
    pub fn from_code(code: &str) -> SmsType {
        match code {
            "1" => SmsType::Received,
            "2" => SmsType::Sent,
            "3" => SmsType::Draft,
            "4" => SmsType::Outbox,
            "5" => SmsType::Failed,
            _ => SmsType::Unknown,
        }
    }
}

/// An entry exactly as read from a source document: its element name, its
/// attributes verbatim, and any `<part>` children. Typed entries are built
/// from this, and quarantined entries are re-serialized from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub element: String,
    pub attributes: BTreeMap<String, String>,
    pub parts: Vec<BTreeMap<String, String>>,
}

impl RawEntry {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            attributes: BTreeMap::new(),
            parts: Vec::new(),
        }
    }
}

fn present<'a>(attributes: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    attributes
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty() && *value != NULL_LITERAL)
}

fn parse_date(attributes: &BTreeMap<String, String>) -> Result<i64> {
    let raw = present(attributes, "date").ok_or(Error::InvalidAttribute {
        name: "date",
        value: String::new(),
    })?;
    raw.parse::<i64>().map_err(|_| Error::InvalidAttribute {
        name: "date",
        value: raw.to_string(),
    })
}

/// One telephony event. All vendor attributes are preserved verbatim in
/// `attributes`; typed accessors apply the `null`-means-absent rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub date_ms: i64,
    pub attributes: BTreeMap<String, String>,
}

impl Call {
    pub fn from_attributes(attributes: BTreeMap<String, String>) -> Result<Self> {
        let date_ms = parse_date(&attributes)?;
        Ok(Self {
            date_ms,
            attributes,
        })
    }

    pub fn number(&self) -> &str {
        present(&self.attributes, "number").unwrap_or("")
    }

    pub fn duration_seconds(&self) -> u64 {
        present(&self.attributes, "duration")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    pub fn call_type(&self) -> CallType {
        present(&self.attributes, "type")
            .map(CallType::from_code)
            .unwrap_or(CallType::Unknown)
    }

    pub fn contact_name(&self) -> Option<&str> {
        present(&self.attributes, "contact_name")
    }
}

/// A single-part text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sms {
    pub date_ms: i64,
    pub attributes: BTreeMap<String, String>,
}

impl Sms {
    pub fn from_attributes(attributes: BTreeMap<String, String>) -> Result<Self> {
        let date_ms = parse_date(&attributes)?;
        Ok(Self {
            date_ms,
            attributes,
        })
    }

    pub fn address(&self) -> &str {
        present(&self.attributes, "address").unwrap_or("")
    }

    pub fn body(&self) -> &str {
        present(&self.attributes, "body").unwrap_or("")
    }

    pub fn sms_type(&self) -> SmsType {
        present(&self.attributes, "type")
            .map(SmsType::from_code)
            .unwrap_or(SmsType::Unknown)
    }

    pub fn contact_name(&self) -> Option<&str> {
        present(&self.attributes, "contact_name")
    }
}

/// One part of a multi-part message. Carries either inline text (kept in
/// the attributes) or binary payload: `data` before extraction, `path`
/// after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmsPart {
    pub attributes: BTreeMap<String, String>,
}

impl MmsPart {
    pub fn content_type(&self) -> &str {
        present(&self.attributes, "ct").unwrap_or("")
    }

    pub fn sequence(&self) -> Option<u32> {
        present(&self.attributes, "seq").and_then(|value| value.parse().ok())
    }

    pub fn original_name(&self) -> Option<&str> {
        present(&self.attributes, "fn")
    }

    pub fn data(&self) -> Option<&str> {
        present(&self.attributes, "data")
    }

    pub fn blob_path(&self) -> Option<&str> {
        present(&self.attributes, "path")
    }
}

/// A multi-part message: SMS-like headers plus an ordered part list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mms {
    pub date_ms: i64,
    pub attributes: BTreeMap<String, String>,
    pub parts: Vec<MmsPart>,
}

impl Mms {
    pub fn from_raw(raw: RawEntry) -> Result<Self> {
        let date_ms = parse_date(&raw.attributes)?;
        Ok(Self {
            date_ms,
            attributes: raw.attributes,
            parts: raw
                .parts
                .into_iter()
                .map(|attributes| MmsPart { attributes })
                .collect(),
        })
    }

    pub fn address(&self) -> &str {
        present(&self.attributes, "address").unwrap_or("")
    }

    pub fn contact_name(&self) -> Option<&str> {
        present(&self.attributes, "contact_name")
    }
}

/// The message sum type held by `sms/` year files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Sms(Sms),
    Mms(Mms),
}

impl Message {
    pub fn date_ms(&self) -> i64 {
        match self {
            Message::Sms(sms) => sms.date_ms,
            Message::Mms(mms) => mms.date_ms,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Message::Sms(sms) => sms.address(),
            Message::Mms(mms) => mms.address(),
        }
    }

    pub fn contact_name(&self) -> Option<&str> {
        match self {
            Message::Sms(sms) => sms.contact_name(),
            Message::Mms(mms) => mms.contact_name(),
        }
    }
}
