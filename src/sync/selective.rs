//! Selective import: pick source records by time window or predicate and
//! import them with their dependencies.
//!
//! The source is only ever read. Selection never produces deletions, and the
//! batch is always validated before anything is written.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::model::{PropertyValue, Record, RecordId, RecordType};
use crate::storage::{RecordSource, RecordStore};
use crate::sync::hierarchy::{HierarchicalImporter, ImportOptions};
use crate::sync::matching::MatchStrategy;
use crate::sync::resolver::ConflictResolver;
use crate::sync::types::SyncReport;

/// Which timestamp a [`TimeWindow`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    Created,
    Modified,
}

impl TimeField {
    fn of(self, record: &Record) -> i64 {
        match self {
            Self::Created => record.created_at,
            Self::Modified => record.modified_at,
        }
    }
}

impl fmt::Display for TimeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// Half-open window over a record timestamp: `after <= t < before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub field: TimeField,
    /// Unix milliseconds, inclusive.
    pub after: Option<i64>,
    /// Unix milliseconds, exclusive.
    pub before: Option<i64>,
}

impl TimeWindow {
    #[must_use]
    pub fn contains(&self, record: &Record) -> bool {
        let t = self.field.of(record);
        self.after.is_none_or(|a| t >= a) && self.before.is_none_or(|b| t < b)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_ts = |ms: i64| {
            DateTime::<Utc>::from_timestamp_millis(ms).map_or_else(|| ms.to_string(), |d| d.to_rfc3339())
        };
        write!(f, "{}", self.field)?;
        if let Some(a) = self.after {
            write!(f, " after {}", fmt_ts(a))?;
        }
        if let Some(b) = self.before {
            write!(f, " before {}", fmt_ts(b))?;
        }
        Ok(())
    }
}

/// Parse an RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC)
/// into Unix milliseconds.
///
/// # Errors
///
/// Returns `InvalidArgument` when neither form parses.
pub fn parse_timestamp(input: &str) -> Result<i64> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp_millis());
    }
    if let Some(dt) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(dt.and_utc().timestamp_millis());
    }
    Err(Error::InvalidArgument(format!(
        "invalid timestamp '{input}', expected RFC 3339 or YYYY-MM-DD"
    )))
}

/// Parse a `field=value` property predicate.
///
/// # Errors
///
/// Returns `InvalidArgument` without an `=` or with an empty field name.
pub fn parse_property_filter(spec: &str) -> Result<(String, String)> {
    match spec.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(Error::InvalidArgument(format!(
            "property filter '{spec}' must look like field=value"
        ))),
    }
}

/// Whether `value` matches `wanted`, case-insensitively.
///
/// Localized text matches on any writing system; reference lists match on
/// any member.
#[must_use]
pub fn property_matches(value: &PropertyValue, wanted: &str) -> bool {
    let wanted = wanted.to_lowercase();
    let eq = |s: &str| s.to_lowercase() == wanted;
    match value {
        PropertyValue::Empty => wanted.is_empty(),
        PropertyValue::Text(s) => eq(s),
        PropertyValue::Localized(t) => t.iter().any(|(_, s)| eq(s)),
        PropertyValue::Integer(n) => eq(&n.to_string()),
        PropertyValue::Reference(id) => id.is_some_and(|id| eq(&id.to_string())),
        PropertyValue::ReferenceList { ids, .. } => ids.iter().any(|id| eq(&id.to_string())),
        other => other.match_key(true).is_some_and(|k| k == wanted),
    }
}

type Predicate = Box<dyn Fn(&Record) -> bool>;

/// Conjunction of time windows and named predicates.
#[derive(Default)]
pub struct RecordFilter {
    windows: Vec<TimeWindow>,
    predicates: Vec<(String, Predicate)>,
}

impl fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordFilter")
            .field("windows", &self.windows)
            .field("predicates", &self.predicates.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

impl RecordFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.windows.push(window);
        self
    }

    /// Add a caller predicate. `name` is only used in descriptions.
    #[must_use]
    pub fn with_predicate(mut self, name: &str, predicate: impl Fn(&Record) -> bool + 'static) -> Self {
        self.predicates.push((name.to_string(), Box::new(predicate)));
        self
    }

    /// Keep records whose `field` matches `value` (see [`property_matches`]).
    #[must_use]
    pub fn with_property(self, field: &str, value: &str) -> Self {
        let name = format!("{field}={value}");
        let field = field.to_string();
        let value = value.to_string();
        self.with_predicate(&name, move |record| {
            record
                .properties()
                .get(&field)
                .is_some_and(|v| property_matches(v, &value))
        })
    }

    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.windows.iter().all(|w| w.contains(record)) && self.predicates.iter().all(|(_, p)| p(record))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty() && self.predicates.is_empty()
    }

    /// Human summary, e.g. `modified after 2024-01-01T00:00:00+00:00, gloss=run`.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "all records".to_string();
        }
        self.windows
            .iter()
            .map(ToString::to_string)
            .chain(self.predicates.iter().map(|(n, _)| n.clone()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Imports the records of one type that pass a filter.
pub struct SelectiveImporter<'a, S: RecordSource + ?Sized, T: RecordStore + ?Sized> {
    importer: HierarchicalImporter<'a, S, T>,
    source: &'a S,
    filter: RecordFilter,
}

impl<'a, S: RecordSource + ?Sized, T: RecordStore + ?Sized> SelectiveImporter<'a, S, T> {
    pub fn new(source: &'a S, target: &'a mut T, filter: RecordFilter) -> Self {
        Self {
            importer: HierarchicalImporter::new(source, target),
            source,
            filter,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, record_type: RecordType, strategy: Box<dyn MatchStrategy>) -> Self {
        self.importer = self.importer.with_strategy(record_type, strategy);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn ConflictResolver>) -> Self {
        self.importer = self.importer.with_resolver(resolver);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.importer = self.importer.with_options(options);
        self
    }

    /// Source records of `record_type` passing the filter.
    ///
    /// # Errors
    ///
    /// Returns the source read error.
    pub fn candidates(&self, record_type: RecordType) -> Result<Vec<RecordId>> {
        Ok(self
            .source
            .all(record_type)?
            .iter()
            .filter(|r| self.filter.matches(r))
            .map(|r| r.id)
            .collect())
    }

    /// Import every candidate of `record_type` with its dependencies.
    ///
    /// # Errors
    ///
    /// Same as [`HierarchicalImporter::import`].
    pub fn run(mut self, record_type: RecordType) -> Result<SyncReport> {
        let seeds = self.candidates(record_type)?;
        tracing::info!(
            record_type = %record_type,
            candidates = seeds.len(),
            filter = %self.filter.describe(),
            "Selected records"
        );
        let mut report = self.importer.import(record_type, &seeds)?;
        report.operation = "select".to_string();
        Ok(report)
    }
}
