//! Shared sync vocabulary: changes, outcomes and reports.
//!
//! A sync run produces one [`Change`] per record pair, one [`RecordOutcome`]
//! per attempted record, and a [`SyncReport`] that is always returned, even
//! when validation blocked every write.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::model::{PropertyMap, PropertyValue, RecordId, RecordType};

/// Classification of one source/target pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// Only in the source.
    New,
    /// Both sides differ.
    Modified,
    /// Only in the target.
    Deleted,
    /// Both sides changed the same field since the baseline.
    Conflict,
    /// Normalized-equal on every property.
    Unchanged,
}

impl ChangeType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Conflict => "CONFLICT",
            Self::Unchanged => "UNCHANGED",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side moved away from the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedSide {
    Source,
    Target,
    Both,
    /// No baseline was available.
    Unknown,
}

/// One differing property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDelta {
    pub source: PropertyValue,
    pub target: PropertyValue,
    pub side: ChangedSide,
}

/// Differences inside one owning collection, matched by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChildDelta {
    pub added: Vec<RecordId>,
    pub removed: Vec<RecordId>,
    pub modified: Vec<RecordId>,
}

impl ChildDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// The diff of one source/target pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub change_type: ChangeType,
    pub record_type: RecordType,
    pub source_id: Option<RecordId>,
    pub target_id: Option<RecordId>,
    pub label: String,
    /// Differing properties only.
    pub delta: BTreeMap<String, PropertyDelta>,
    /// Full source properties. Empty for `DELETED`.
    #[serde(skip)]
    pub source_properties: PropertyMap,
    /// Owning collection name → child differences. Empty collections are omitted.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, ChildDelta>,
    /// Matching notes, e.g. ambiguity or an already-claimed target.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_modified: Option<i64>,
}

impl Change {
    /// The identity this change is reported under: the target's when
    /// matched, the source's otherwise.
    #[must_use]
    pub fn record_id(&self) -> RecordId {
        self.target_id
            .or(self.source_id)
            .unwrap_or_else(|| RecordId::from_uuid(uuid::Uuid::nil()))
    }

    /// Fields that both sides changed since the baseline.
    #[must_use]
    pub fn conflicting_fields(&self) -> Vec<&str> {
        self.delta
            .iter()
            .filter(|(_, d)| d.side == ChangedSide::Both)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    #[must_use]
    pub fn is_divergence(&self) -> bool {
        matches!(self.change_type, ChangeType::Modified | ChangeType::Conflict)
    }
}

/// Diff of one record type.
#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    pub record_type: RecordType,
    pub strategy: String,
    pub changes: Vec<Change>,
}

impl DiffResult {
    /// Count per change type, in `ChangeType` order.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<ChangeType, usize> {
        let mut counts = BTreeMap::new();
        for change in &self.changes {
            *counts.entry(change.change_type).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn count(&self, change_type: ChangeType) -> usize {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .count()
    }

    /// True when every pair is unchanged.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.changes
            .iter()
            .all(|c| c.change_type == ChangeType::Unchanged)
    }
}

/// Validation issue severity. CRITICAL blocks writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding of the reference validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub record_id: RecordId,
    pub record_type: RecordType,
    pub message: String,
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Created,
    Updated,
    Deleted,
    Skipped,
    Errored,
    Unchanged,
}

impl Disposition {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Skipped => "skipped",
            Self::Errored => "errored",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-record result of a sync or import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub record_id: RecordId,
    pub record_type: RecordType,
    pub label: String,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RecordOutcome {
    #[must_use]
    pub fn new(record_id: RecordId, record_type: RecordType, label: &str, disposition: Disposition) -> Self {
        Self {
            record_id,
            record_type,
            label: label.to_string(),
            disposition,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A record-level failure. The run continues unless fail-fast is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    pub record_id: RecordId,
    pub record_type: RecordType,
    pub code: String,
    pub message: String,
}

impl RecordError {
    #[must_use]
    pub fn from_error(record_id: RecordId, record_type: RecordType, err: &crate::error::Error) -> Self {
        Self {
            record_id,
            record_type,
            code: err.error_code().as_str().to_string(),
            message: err.to_string(),
        }
    }
}

/// A reference write postponed until the referenced records exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingPatch {
    pub record_id: RecordId,
    pub record_type: RecordType,
    pub field: String,
    /// Batch records that did not exist yet when the owner was written.
    pub referenced: Vec<RecordId>,
    pub value: PropertyValue,
    pub applied: bool,
}

/// Per-disposition counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errored: usize,
    pub unchanged: usize,
}

impl SyncStats {
    #[must_use]
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.skipped + self.errored + self.unchanged
    }

    /// Records actually written to the target.
    #[must_use]
    pub fn written(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Overall verdict of a run; maps to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    CompletedWithWarnings,
    ValidationBlocked,
    RuntimeError,
}

impl ReportStatus {
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Success => 0,
            Self::RuntimeError => 1,
            Self::ValidationBlocked => 4,
            Self::CompletedWithWarnings => 10,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CompletedWithWarnings => "completed with warnings",
            Self::ValidationBlocked => "validation blocked",
            Self::RuntimeError => "runtime error",
        }
    }
}

/// The single result object of sync, hierarchical import and selective import.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub operation: String,
    pub record_type: RecordType,
    pub dry_run: bool,
    pub changes: Vec<Change>,
    pub outcomes: Vec<RecordOutcome>,
    pub issues: Vec<ValidationIssue>,
    pub errors: Vec<RecordError>,
    pub dependency_errors: Vec<String>,
    pub patches: Vec<PendingPatch>,
    pub blocked: bool,
    pub cancelled: bool,
    pub aborted: bool,
}

impl SyncReport {
    #[must_use]
    pub fn new(operation: &str, record_type: RecordType, dry_run: bool) -> Self {
        Self {
            operation: operation.to_string(),
            record_type,
            dry_run,
            changes: Vec::new(),
            outcomes: Vec::new(),
            issues: Vec::new(),
            errors: Vec::new(),
            dependency_errors: Vec::new(),
            patches: Vec::new(),
            blocked: false,
            cancelled: false,
            aborted: false,
        }
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        let mut stats = SyncStats::default();
        for outcome in &self.outcomes {
            match outcome.disposition {
                Disposition::Created => stats.created += 1,
                Disposition::Updated => stats.updated += 1,
                Disposition::Deleted => stats.deleted += 1,
                Disposition::Skipped => stats.skipped += 1,
                Disposition::Errored => stats.errored += 1,
                Disposition::Unchanged => stats.unchanged += 1,
            }
        }
        stats
    }

    #[must_use]
    pub fn issue_count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    #[must_use]
    pub fn outcome_for(&self, id: &RecordId) -> Option<&RecordOutcome> {
        self.outcomes.iter().find(|o| &o.record_id == id)
    }

    /// Informational findings alone do not downgrade a run.
    #[must_use]
    pub fn status(&self) -> ReportStatus {
        if self.blocked {
            ReportStatus::ValidationBlocked
        } else if !self.errors.is_empty() {
            ReportStatus::RuntimeError
        } else if self.cancelled
            || !self.dependency_errors.is_empty()
            || self.issues.iter().any(|i| i.severity != Severity::Info)
        {
            ReportStatus::CompletedWithWarnings
        } else {
            ReportStatus::Success
        }
    }
}
