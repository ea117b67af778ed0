//! Record types and static property extraction.
//!
//! Each concrete record subtype is one variant of [`RecordKind`] carrying only
//! its own fields. Property extraction and property writes are declared per
//! subtype through [`Extractable`]; there is no runtime reflection.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::value::{Coordinate, LocalizedText, PropertyMap, PropertyValue, RecordId};

/// Record type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Entry,
    Sense,
    Example,
    Tag,
}

impl RecordType {
    pub const ALL: [Self; 4] = [Self::Entry, Self::Sense, Self::Example, Self::Tag];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Sense => "sense",
            Self::Example => "example",
            Self::Tag => "tag",
        }
    }

    /// Owning collections: `(relationship name, child type)`.
    #[must_use]
    pub const fn owned_collections(&self) -> &'static [(&'static str, RecordType)] {
        match self {
            Self::Entry => &[("senses", RecordType::Sense)],
            Self::Sense => &[("examples", RecordType::Example)],
            Self::Example => &[],
            Self::Tag => &[("subtags", RecordType::Tag)],
        }
    }

    /// Reference properties: `(property name, expected referenced type)`.
    #[must_use]
    pub const fn reference_fields(&self) -> &'static [(&'static str, RecordType)] {
        match self {
            Self::Entry => &[("variant_of", RecordType::Entry), ("components", RecordType::Entry)],
            Self::Sense => &[
                ("part_of_speech", RecordType::Tag),
                ("semantic_domains", RecordType::Tag),
            ],
            Self::Example | Self::Tag => &[],
        }
    }

    /// Fields a human would use to recognise the record.
    #[must_use]
    pub const fn display_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Entry => &["lexeme_form"],
            Self::Sense => &["gloss", "definition"],
            Self::Example => &["text"],
            Self::Tag => &["name"],
        }
    }

    /// Default composite key for field matching.
    #[must_use]
    pub const fn default_match_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Entry => &["lexeme_form", "homograph_number"],
            Self::Sense => &["gloss"],
            Self::Example => &["text"],
            Self::Tag => &["name", "category"],
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "entry" | "entries" | "lexentry" => Ok(Self::Entry),
            "sense" | "senses" | "lexsense" => Ok(Self::Sense),
            "example" | "examples" => Ok(Self::Example),
            "tag" | "tags" | "possibility" => Ok(Self::Tag),
            _ => Err(Error::UnknownRecordType(s.to_string())),
        }
    }
}

/// Static per-type extraction and property writes.
pub trait Extractable {
    /// Comparable properties. Excludes identity, owning collections and
    /// store-local handles.
    fn extract(&self) -> PropertyMap;

    /// Write one property by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty` for names the type does not declare and
    /// `PropertyType` when the value has the wrong shape.
    fn apply(&mut self, name: &str, value: PropertyValue) -> Result<()>;
}

/// A lexical entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entry {
    pub lexeme_form: LocalizedText,
    pub citation_form: LocalizedText,
    pub morph_type: Option<String>,
    pub homograph_number: i64,
    pub variant_of: Option<RecordId>,
    pub components: Vec<RecordId>,
    pub note: LocalizedText,
}

/// One meaning of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sense {
    pub gloss: LocalizedText,
    pub definition: LocalizedText,
    pub part_of_speech: Option<RecordId>,
    pub semantic_domains: Vec<RecordId>,
}

/// An illustrative sentence for a sense.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Example {
    pub text: LocalizedText,
    pub translation: LocalizedText,
    pub reference: Option<String>,
    pub recorded_on: Option<NaiveDate>,
    pub location: Option<Coordinate>,
}

/// A possibility-list item (part of speech, semantic domain, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tag {
    pub name: LocalizedText,
    pub abbreviation: LocalizedText,
    pub category: Option<String>,
}

fn insert(map: &mut PropertyMap, name: &str, value: PropertyValue) {
    map.insert(name.to_string(), value.normalized());
}

fn optional_text(value: Option<&String>) -> PropertyValue {
    value.map_or(PropertyValue::Empty, |s| PropertyValue::Text(s.clone()))
}

fn type_error(record_type: RecordType, property: &str, expected: &'static str) -> Error {
    Error::PropertyType {
        record_type: record_type.to_string(),
        property: property.to_string(),
        expected,
    }
}

fn unknown(record_type: RecordType, property: &str) -> Error {
    Error::UnknownProperty {
        record_type: record_type.to_string(),
        property: property.to_string(),
    }
}

fn to_localized(rt: RecordType, name: &str, value: PropertyValue) -> Result<LocalizedText> {
    match value {
        PropertyValue::Localized(t) => Ok(t.normalized()),
        PropertyValue::Empty => Ok(LocalizedText::new()),
        _ => Err(type_error(rt, name, "localized text")),
    }
}

fn to_text(rt: RecordType, name: &str, value: PropertyValue) -> Result<Option<String>> {
    match value {
        PropertyValue::Text(s) if s.is_empty() => Ok(None),
        PropertyValue::Text(s) => Ok(Some(s)),
        PropertyValue::Empty => Ok(None),
        _ => Err(type_error(rt, name, "text")),
    }
}

fn to_integer(rt: RecordType, name: &str, value: PropertyValue) -> Result<i64> {
    match value {
        PropertyValue::Integer(n) => Ok(n),
        PropertyValue::Empty => Ok(0),
        _ => Err(type_error(rt, name, "integer")),
    }
}

fn to_reference(rt: RecordType, name: &str, value: PropertyValue) -> Result<Option<RecordId>> {
    match value {
        PropertyValue::Reference(id) => Ok(id),
        PropertyValue::Empty => Ok(None),
        _ => Err(type_error(rt, name, "reference")),
    }
}

fn to_reference_list(rt: RecordType, name: &str, value: PropertyValue) -> Result<Vec<RecordId>> {
    match value {
        PropertyValue::ReferenceList { ids, .. } => Ok(ids),
        PropertyValue::Empty => Ok(Vec::new()),
        _ => Err(type_error(rt, name, "reference list")),
    }
}

fn to_date(rt: RecordType, name: &str, value: PropertyValue) -> Result<Option<NaiveDate>> {
    match value {
        PropertyValue::Date(d) => Ok(Some(d)),
        PropertyValue::Empty => Ok(None),
        _ => Err(type_error(rt, name, "date")),
    }
}

fn to_coordinate(rt: RecordType, name: &str, value: PropertyValue) -> Result<Option<Coordinate>> {
    match value {
        PropertyValue::Coordinate(c) => Ok(Some(c)),
        PropertyValue::Empty => Ok(None),
        _ => Err(type_error(rt, name, "coordinate")),
    }
}

impl Extractable for Entry {
    fn extract(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        insert(&mut map, "lexeme_form", PropertyValue::Localized(self.lexeme_form.clone()));
        insert(&mut map, "citation_form", PropertyValue::Localized(self.citation_form.clone()));
        insert(&mut map, "morph_type", optional_text(self.morph_type.as_ref()));
        insert(&mut map, "homograph_number", PropertyValue::Integer(self.homograph_number));
        insert(&mut map, "variant_of", PropertyValue::Reference(self.variant_of));
        insert(
            &mut map,
            "components",
            PropertyValue::ReferenceList {
                ids: self.components.clone(),
                ordered: true,
            },
        );
        insert(&mut map, "note", PropertyValue::Localized(self.note.clone()));
        map
    }

    fn apply(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let rt = RecordType::Entry;
        match name {
            "lexeme_form" => self.lexeme_form = to_localized(rt, name, value)?,
            "citation_form" => self.citation_form = to_localized(rt, name, value)?,
            "morph_type" => self.morph_type = to_text(rt, name, value)?,
            "homograph_number" => self.homograph_number = to_integer(rt, name, value)?,
            "variant_of" => self.variant_of = to_reference(rt, name, value)?,
            "components" => self.components = to_reference_list(rt, name, value)?,
            "note" => self.note = to_localized(rt, name, value)?,
            _ => return Err(unknown(rt, name)),
        }
        Ok(())
    }
}

impl Extractable for Sense {
    fn extract(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        insert(&mut map, "gloss", PropertyValue::Localized(self.gloss.clone()));
        insert(&mut map, "definition", PropertyValue::Localized(self.definition.clone()));
        insert(&mut map, "part_of_speech", PropertyValue::Reference(self.part_of_speech));
        insert(
            &mut map,
            "semantic_domains",
            PropertyValue::ReferenceList {
                ids: self.semantic_domains.clone(),
                ordered: false,
            },
        );
        map
    }

    fn apply(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let rt = RecordType::Sense;
        match name {
            "gloss" => self.gloss = to_localized(rt, name, value)?,
            "definition" => self.definition = to_localized(rt, name, value)?,
            "part_of_speech" => self.part_of_speech = to_reference(rt, name, value)?,
            "semantic_domains" => self.semantic_domains = to_reference_list(rt, name, value)?,
            _ => return Err(unknown(rt, name)),
        }
        Ok(())
    }
}

impl Extractable for Example {
    fn extract(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        insert(&mut map, "text", PropertyValue::Localized(self.text.clone()));
        insert(&mut map, "translation", PropertyValue::Localized(self.translation.clone()));
        insert(&mut map, "reference", optional_text(self.reference.as_ref()));
        insert(
            &mut map,
            "recorded_on",
            self.recorded_on.map_or(PropertyValue::Empty, PropertyValue::Date),
        );
        insert(
            &mut map,
            "location",
            self.location.map_or(PropertyValue::Empty, PropertyValue::Coordinate),
        );
        map
    }

    fn apply(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let rt = RecordType::Example;
        match name {
            "text" => self.text = to_localized(rt, name, value)?,
            "translation" => self.translation = to_localized(rt, name, value)?,
            "reference" => self.reference = to_text(rt, name, value)?,
            "recorded_on" => self.recorded_on = to_date(rt, name, value)?,
            "location" => self.location = to_coordinate(rt, name, value)?,
            _ => return Err(unknown(rt, name)),
        }
        Ok(())
    }
}

impl Extractable for Tag {
    fn extract(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        insert(&mut map, "name", PropertyValue::Localized(self.name.clone()));
        insert(&mut map, "abbreviation", PropertyValue::Localized(self.abbreviation.clone()));
        insert(&mut map, "category", optional_text(self.category.as_ref()));
        map
    }

    fn apply(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let rt = RecordType::Tag;
        match name {
            "name" => self.name = to_localized(rt, name, value)?,
            "abbreviation" => self.abbreviation = to_localized(rt, name, value)?,
            "category" => self.category = to_text(rt, name, value)?,
            _ => return Err(unknown(rt, name)),
        }
        Ok(())
    }
}

/// Tagged union over the concrete record subtypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    Entry(Entry),
    Sense(Sense),
    Example(Example),
    Tag(Tag),
}

impl RecordKind {
    /// A record of `record_type` with every property empty.
    #[must_use]
    pub fn empty(record_type: RecordType) -> Self {
        match record_type {
            RecordType::Entry => Self::Entry(Entry::default()),
            RecordType::Sense => Self::Sense(Sense::default()),
            RecordType::Example => Self::Example(Example::default()),
            RecordType::Tag => Self::Tag(Tag::default()),
        }
    }

    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        match self {
            Self::Entry(_) => RecordType::Entry,
            Self::Sense(_) => RecordType::Sense,
            Self::Example(_) => RecordType::Example,
            Self::Tag(_) => RecordType::Tag,
        }
    }
}

impl Extractable for RecordKind {
    fn extract(&self) -> PropertyMap {
        match self {
            Self::Entry(e) => e.extract(),
            Self::Sense(s) => s.extract(),
            Self::Example(x) => x.extract(),
            Self::Tag(t) => t.extract(),
        }
    }

    fn apply(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        match self {
            Self::Entry(e) => e.apply(name, value),
            Self::Sense(s) => s.apply(name, value),
            Self::Example(x) => x.apply(name, value),
            Self::Tag(t) => t.apply(name, value),
        }
    }
}

/// Position of an owned record inside its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerLink {
    pub owner: RecordId,
    /// Owning collection name, e.g. `senses`.
    pub field: String,
}

/// A record as seen through a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub owner: Option<OwnerLink>,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub modified_at: i64,
    pub kind: RecordKind,
}

impl Record {
    /// New record with a fresh identity, timestamped now.
    #[must_use]
    pub fn new(kind: RecordKind) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: RecordId::generate(),
            owner: None,
            created_at: now,
            modified_at: now,
            kind,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn owned_by(mut self, owner: RecordId, field: &str) -> Self {
        self.owner = Some(OwnerLink {
            owner,
            field: field.to_string(),
        });
        self
    }

    #[must_use]
    pub fn with_timestamps(mut self, created_at: i64, modified_at: i64) -> Self {
        self.created_at = created_at;
        self.modified_at = modified_at;
        self
    }

    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        self.kind.record_type()
    }

    /// Extracted comparable properties.
    #[must_use]
    pub fn properties(&self) -> PropertyMap {
        self.kind.extract()
    }

    /// Non-empty reference targets as `(property, referenced id)` pairs.
    #[must_use]
    pub fn references(&self) -> Vec<(String, RecordId)> {
        let props = self.properties();
        self.record_type()
            .reference_fields()
            .iter()
            .filter_map(|(name, _)| props.get(*name).map(|v| (*name, v)))
            .flat_map(|(name, value)| {
                value
                    .referenced_ids()
                    .into_iter()
                    .map(move |id| (name.to_string(), id))
            })
            .collect()
    }

    /// Human label: first non-empty display field, else the short id.
    #[must_use]
    pub fn label(&self) -> String {
        let props = self.properties();
        self.record_type()
            .display_fields()
            .iter()
            .filter_map(|f| props.get(*f))
            .find_map(|v| match v {
                PropertyValue::Localized(t) => t.best("en").map(str::to_string),
                PropertyValue::Text(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_else(|| self.id.short())
    }
}

/// Request to create an empty record in a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub id: RecordId,
    pub record_type: RecordType,
    pub owner: Option<OwnerLink>,
}
