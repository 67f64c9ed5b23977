//! Agenda model: date key -> ordered, de-duplicated document identifiers.
//!
//! The agenda is rebuilt on every run. Date keys and identifiers both end
//! up as path components under the base directory, so anything that could
//! escape it is rejected by [`validate_component`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Date key used when a document is found before any telechat date.
pub const UNKNOWN_DATE: &str = "Unknown-date";

/// A versioned document name such as `draft-ietf-foo-bar-03`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    /// Build `name-revision`.
    pub fn from_parts(name: &str, rev: &str) -> Self {
        DocumentId(format!("{}-{}", name, rev))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name the document is stored under.
    pub fn file_name(&self) -> String {
        format!("{}.pdf", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId::new(s)
    }
}

/// Check that `value` is usable as a single path component.
pub fn validate_component(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("empty path component".to_string());
    }
    if value == "." || value == ".." {
        return Err(format!("'{}' is not a valid path component", value));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(format!("'{}' contains a path separator", value));
    }
    Ok(())
}

/// Telechat agenda grouped by date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Agenda {
    entries: BTreeMap<String, Vec<DocumentId>>,
}

impl Agenda {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` under `date`.
    ///
    /// Returns `false` if the identifier is already listed for that date.
    /// The same identifier under a different date is kept.
    pub fn insert(&mut self, date: &str, id: DocumentId) -> bool {
        let docs = self.entries.entry(date.to_string()).or_default();
        if docs.contains(&id) {
            return false;
        }
        docs.push(id);
        true
    }

    /// Documents listed for `date`, in insertion order.
    pub fn documents(&self, date: &str) -> &[DocumentId] {
        self.entries.get(date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Date keys in sorted order.
    pub fn dates(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All `(date, id)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DocumentId)> {
        self.entries
            .iter()
            .flat_map(|(date, docs)| docs.iter().map(move |id| (date.as_str(), id)))
    }

    /// Total number of identifiers across all dates.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn date_count(&self) -> usize {
        self.entries.len()
    }
}

impl<D, I> FromIterator<(D, I)> for Agenda
where
    D: AsRef<str>,
    I: Into<DocumentId>,
{
    fn from_iter<T: IntoIterator<Item = (D, I)>>(iter: T) -> Self {
        let mut agenda = Agenda::new();
        for (date, id) in iter {
            agenda.insert(date.as_ref(), id.into());
        }
        agenda
    }
}
