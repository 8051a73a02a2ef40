//! Records and the normalizer that turns raw rows into them.

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, RecordResult};

const NAME_KEYS: [&str; 3] = ["Name", "name", "NAME"];
const ADDRESS_KEYS: [&str; 3] = ["Email", "email", "EMAIL"];

const NAME_POSITION: usize = 0;
const ADDRESS_POSITION: usize = 1;

/// One raw row: field names and values in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawFields(Vec<(String, String)>);

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Value of the first field whose name matches `key` exactly.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value at a position, ignoring field names.
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<Vec<(String, String)>> for RawFields {
    fn from(value: Vec<(String, String)>) -> Self {
        Self(value)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A row that resolved to a recipient.
///
/// Both `display_name` and `delivery_address` are trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    display_name: String,
    delivery_address: String,
    raw_fields: RawFields,
}

impl Record {
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn delivery_address(&self) -> &str {
        &self.delivery_address
    }

    pub fn raw_fields(&self) -> &RawFields {
        &self.raw_fields
    }

    /// File name of this record's rendered artifact.
    pub fn artifact_file_name(&self) -> String {
        artifact_file_name(&self.display_name)
    }
}

/// Resolve the display name and delivery address of a raw row.
///
/// Known keys are tried first (case variants, blank values skipped), then the
/// first field stands in for the name and the second for the address.
pub fn normalize(raw: RawFields) -> RecordResult<Record> {
    let display_name = resolve(&raw, &NAME_KEYS, NAME_POSITION)
        .ok_or(RecordError::MissingName)?
        .to_string();
    let delivery_address = resolve(&raw, &ADDRESS_KEYS, ADDRESS_POSITION)
        .ok_or(RecordError::MissingAddress)?
        .to_string();

    Ok(Record {
        display_name,
        delivery_address,
        raw_fields: raw,
    })
}

/// `<sanitized name>_certificate.pdf`, where every character outside
/// `[A-Za-z0-9]` becomes `_`.
pub fn artifact_file_name(display_name: &str) -> String {
    format!("{}_certificate.pdf", sanitize(display_name))
}

fn resolve<'a>(raw: &'a RawFields, keys: &[&str], position: usize) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| raw.get(key))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .or_else(|| {
            raw.value_at(position)
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
