//! Data models for gsync.
//!
//! - [`value`] - identities, localized text and property values
//! - [`record`] - record subtypes and per-type property extraction

pub mod record;
pub mod value;

pub use record::{
    Entry, Example, Extractable, NewRecord, OwnerLink, Record, RecordKind, RecordType, Sense, Tag,
};
pub use value::{Coordinate, LocalizedText, PropertyMap, PropertyValue, RecordId};
