use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::write_atomic;
use crate::{Error, Result};

pub const CONTACTS_FILE: &str = "contacts.yaml";

/// One phone number and the names it has been seen under. Numbers are
/// matched exactly; no normalization is ever applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    #[serde(default)]
    pub contact_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ContactsDoc {
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    unprocessed: Vec<Contact>,
}

/// The known-contacts index plus the accumulating `unprocessed` suggestions.
///
/// Owned by the import orchestrator for the duration of a run; every
/// mutation flows through `observe_message`.
#[derive(Debug)]
pub struct ContactsBook {
    contacts: Vec<Contact>,
    known: HashSet<String>,
    unprocessed: BTreeMap<String, Vec<String>>,
    dirty: bool,
}

impl ContactsBook {
    /// Load `contacts.yaml`; a missing file yields an empty book.
    pub fn load(path: &Path) -> Result<Self> {
        let doc = match fs::read(path) {
            Ok(bytes) => {
                serde_yaml::from_slice::<ContactsDoc>(&bytes).map_err(|err| Error::yaml(path, err))?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ContactsDoc::default(),
            Err(err) => return Err(Error::io(path, err)),
        };

        let known: HashSet<String> = doc
            .contacts
            .iter()
            .map(|contact| contact.phone_number.clone())
            .collect();
        let mut unprocessed = BTreeMap::new();
        for entry in doc.unprocessed {
            // The main list wins: a number present in both is already known.
            if known.contains(&entry.phone_number) {
                continue;
            }
            let names: &mut Vec<String> = unprocessed.entry(entry.phone_number).or_default();
            for name in entry.contact_names {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        Ok(Self {
            contacts: doc.contacts,
            known,
            unprocessed,
            dirty: false,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_known(&self, phone_number: &str) -> bool {
        self.known.contains(phone_number)
    }

    pub fn unprocessed_len(&self) -> usize {
        self.unprocessed.len()
    }

    /// Route one message's address/name pair through the book.
    ///
    /// The address field may carry multiple numbers joined by `~`, the name
    /// field the matching count of names joined by `,` — strictly, with no
    /// whitespace trimming. A count mismatch rejects the message. A message
    /// without a usable name carries no suggestion and is a no-op.
    pub fn observe_message(&mut self, address: &str, contact_name: Option<&str>) -> Result<()> {
        if address.is_empty() {
            return Ok(());
        }
        let addresses: Vec<&str> = address.split('~').collect();
        let Some(raw_names) = contact_name.filter(|value| !value.is_empty()) else {
            return Ok(());
        };
        let names: Vec<&str> = raw_names.split(',').collect();
        if addresses.len() != names.len() {
            return Err(Error::AddressMismatch {
                addresses: addresses.len(),
                names: names.len(),
            });
        }
        for (number, name) in addresses.iter().zip(names.iter()) {
            if self.known.contains(*number) {
                continue;
            }
            let new_number = !self.unprocessed.contains_key(*number);
            let entry = self.unprocessed.entry(number.to_string()).or_default();
            let mut changed = new_number;
            if !name.is_empty() && !entry.iter().any(|existing| existing == name) {
                entry.push(name.to_string());
                changed = true;
            }
            if changed {
                self.dirty = true;
            }
        }
        Ok(())
    }

    /// Write the book back. Unprocessed entries come out sorted by phone
    /// number with first-seen name order preserved.
    pub fn save(&self, path: &Path) -> Result<()> {
        let doc = ContactsDoc {
            contacts: self.contacts.clone(),
            unprocessed: self
                .unprocessed
                .iter()
                .map(|(phone_number, contact_names)| Contact {
                    phone_number: phone_number.clone(),
                    contact_names: contact_names.clone(),
                })
                .collect(),
        };
        let rendered = serde_yaml::to_string(&doc).map_err(|err| Error::yaml(path, err))?;
        write_atomic(path, rendered.as_bytes())
    }

    /// An empty document, used when initializing a repository.
    pub fn write_empty(path: &Path) -> Result<()> {
        let rendered =
            serde_yaml::to_string(&ContactsDoc::default()).map_err(|err| Error::yaml(path, err))?;
        write_atomic(path, rendered.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn book_with_known(numbers: &[&str]) -> ContactsBook {
        ContactsBook {
            contacts: numbers
                .iter()
                .map(|number| Contact {
                    phone_number: number.to_string(),
                    contact_names: vec!["Known".to_string()],
                })
                .collect(),
            known: numbers.iter().map(|n| n.to_string()).collect(),
            unprocessed: BTreeMap::new(),
            dirty: false,
        }
    }

    #[test]
    fn known_number_records_nothing() {
        let mut book = book_with_known(&["5551212"]);
        book.observe_message("5551212", Some("Alice")).unwrap();
        assert_eq!(book.unprocessed_len(), 0);
        assert!(!book.is_dirty());
    }

    #[test]
    fn unknown_number_lands_in_unprocessed() {
        let mut book = book_with_known(&[]);
        book.observe_message("5551212", Some("Alice")).unwrap();
        book.observe_message("5551212", Some("A. Liddell")).unwrap();
        book.observe_message("5551212", Some("Alice")).unwrap();

        assert!(book.is_dirty());
        assert_eq!(book.unprocessed_len(), 1);
        assert_eq!(
            book.unprocessed["5551212"],
            vec!["Alice".to_string(), "A. Liddell".to_string()]
        );
    }

    #[test]
    fn multi_address_count_mismatch_is_rejected() {
        let mut book = book_with_known(&[]);
        let err = book
            .observe_message("555~556", Some("Alice"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AddressMismatch {
                addresses: 2,
                names: 1
            }
        ));
        assert_eq!(book.unprocessed_len(), 0);
    }

    #[test]
    fn multi_address_pairs_names_strictly() {
        let mut book = book_with_known(&["556"]);
        book.observe_message("555~556", Some("Alice, Bob")).unwrap();
        // No trimming: the second name is " Bob", but 556 is known anyway.
        assert_eq!(book.unprocessed_len(), 1);
        assert_eq!(book.unprocessed["555"], vec!["Alice".to_string()]);
    }

    #[test]
    fn absent_name_is_a_noop() {
        let mut book = book_with_known(&[]);
        book.observe_message("5551212", None).unwrap();
        assert_eq!(book.unprocessed_len(), 0);
        assert!(!book.is_dirty());
    }

    #[test]
    fn save_sorts_unprocessed_lexicographically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONTACTS_FILE);
        let mut book = book_with_known(&[]);
        book.observe_message("999", Some("Zed")).unwrap();
        book.observe_message("111", Some("Ann")).unwrap();
        book.observe_message("555", Some("Mid")).unwrap();
        book.save(&path).unwrap();

        let loaded = ContactsBook::load(&path).unwrap();
        let numbers: Vec<_> = loaded.unprocessed.keys().cloned().collect();
        assert_eq!(numbers, vec!["111", "555", "999"]);
    }

    #[test]
    fn load_restores_disjointness() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONTACTS_FILE);
        std::fs::write(
            &path,
            "contacts:\n- phone_number: '555'\n  contact_names: [Known]\nunprocessed:\n- phone_number: '555'\n  contact_names: [Stray]\n- phone_number: '556'\n  contact_names: [New]\n",
        )
        .unwrap();

        let book = ContactsBook::load(&path).unwrap();
        assert!(book.is_known("555"));
        assert_eq!(book.unprocessed_len(), 1);
        assert!(book.unprocessed.contains_key("556"));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let book = ContactsBook::load(&dir.path().join(CONTACTS_FILE)).unwrap();
        assert_eq!(book.unprocessed_len(), 0);
        assert!(!book.is_dirty());
    }
}
