//! Property values and identities.
//!
//! Every comparable field of a record is extracted into a [`PropertyValue`].
//! Equality for sync purposes is *normalized*: empty strings, empty localized
//! maps, absent references and empty lists are all the same as [`PropertyValue::Empty`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flat mapping of property name to value, ordered by name.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Globally unique, immutable record identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex digits, for compact console output.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Multi-locale text: locale tag → string.
///
/// Empty alternatives are never stored; setting one removes the tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(BTreeMap<String, String>);

impl LocalizedText {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`LocalizedText::set`].
    #[must_use]
    pub fn with(mut self, tag: &str, text: &str) -> Self {
        self.set(tag, text);
        self
    }

    /// Set the alternative for `tag`; an empty string removes it.
    pub fn set(&mut self, tag: &str, text: &str) {
        if text.is_empty() {
            self.0.remove(tag);
        } else {
            self.0.insert(tag.to_string(), text.to_string());
        }
    }

    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.0.get(tag).map(String::as_str)
    }

    /// True when no tag carries a non-empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(String::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy without empty alternatives (deserialized data may carry them).
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// First non-empty alternative, preferring `tag`.
    #[must_use]
    pub fn best(&self, tag: &str) -> Option<&str> {
        self.get(tag)
            .filter(|s| !s.is_empty())
            .or_else(|| self.0.values().map(String::as_str).find(|s| !s.is_empty()))
    }
}

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// One comparable property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// Absent value.
    Empty,
    Bool(bool),
    Integer(i64),
    Text(String),
    Localized(LocalizedText),
    /// Atomic reference to another record, or absent.
    Reference(Option<RecordId>),
    /// List of references; unordered lists compare as sets.
    ReferenceList { ids: Vec<RecordId>, ordered: bool },
    Date(NaiveDate),
    Coordinate(Coordinate),
}

impl PropertyValue {
    /// Short name of the value kind, used in type errors.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Localized(_) => "localized text",
            Self::Reference(_) => "reference",
            Self::ReferenceList { .. } => "reference list",
            Self::Date(_) => "date",
            Self::Coordinate(_) => "coordinate",
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty | Self::Reference(None) => true,
            Self::Text(s) => s.is_empty(),
            Self::Localized(t) => t.is_empty(),
            Self::ReferenceList { ids, .. } => ids.is_empty(),
            Self::Bool(_) | Self::Integer(_) | Self::Reference(Some(_)) | Self::Date(_) | Self::Coordinate(_) => {
                false
            }
        }
    }

    /// Canonical form: empty values collapse to `Empty`, localized maps lose
    /// empty alternatives, unordered lists are sorted.
    #[must_use]
    pub fn normalized(&self) -> Self {
        if self.is_empty() {
            return Self::Empty;
        }
        match self {
            Self::Localized(t) => Self::Localized(t.normalized()),
            Self::ReferenceList { ids, ordered: false } => {
                let mut ids = ids.clone();
                ids.sort();
                ids.dedup();
                Self::ReferenceList { ids, ordered: false }
            }
            other => other.clone(),
        }
    }

    /// Normalized equality used by the diff engine.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        match (self.normalized(), other.normalized()) {
            (
                Self::ReferenceList { ids: a, ordered: oa },
                Self::ReferenceList { ids: b, ordered: ob },
            ) => {
                if oa && ob {
                    a == b
                } else {
                    let mut a = a;
                    let mut b = b;
                    a.sort();
                    b.sort();
                    a.dedup();
                    b.dedup();
                    a == b
                }
            }
            (a, b) => a == b,
        }
    }

    /// Identities this value points at.
    #[must_use]
    pub fn referenced_ids(&self) -> Vec<RecordId> {
        match self {
            Self::Reference(Some(id)) => vec![*id],
            Self::ReferenceList { ids, .. } => ids.clone(),
            _ => Vec::new(),
        }
    }

    /// True for reference and reference-list values.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_) | Self::ReferenceList { .. })
    }

    /// Canonical string for composite match keys; `None` when empty.
    #[must_use]
    pub fn match_key(&self, case_insensitive: bool) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let key = match self.normalized() {
            Self::Localized(t) => t
                .iter()
                .map(|(tag, text)| format!("{tag}={}", text.trim()))
                .collect::<Vec<_>>()
                .join("\u{1f}"),
            Self::Text(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        Some(if case_insensitive { key.to_lowercase() } else { key })
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty | Self::Reference(None) => write!(f, "(empty)"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "\"{s}\""),
            Self::Localized(t) => {
                let parts: Vec<String> = t.iter().map(|(tag, text)| format!("{tag}: \"{text}\"")).collect();
                if parts.is_empty() {
                    write!(f, "(empty)")
                } else {
                    write!(f, "{{{}}}", parts.join(", "))
                }
            }
            Self::Reference(Some(id)) => write!(f, "-> {}", id.short()),
            Self::ReferenceList { ids, .. } => {
                let parts: Vec<String> = ids.iter().map(RecordId::short).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Coordinate(c) => write!(f, "({}, {})", c.lat, c.lon),
        }
    }
}
