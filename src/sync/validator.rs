//! Reference validator: checks a batch before anything is written.
//!
//! For every record in the batch:
//! - each reference property must point at a record present in the target
//!   or in the batch (CRITICAL otherwise)
//! - a referenced record of the wrong type is a WARNING
//! - an owned record's owner must be present in the target or the batch
//!   (CRITICAL otherwise)
//! - owned children the batch does not carry, and the target lacks, are a
//!   WARNING
//! - records whose display fields are all empty get an INFO note

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::model::{Record, RecordId, RecordType};
use crate::storage::RecordSource;
use crate::sync::types::{Severity, ValidationIssue};

/// Counts per severity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

impl ValidationSummary {
    #[must_use]
    pub fn from_issues(issues: &[ValidationIssue]) -> Self {
        let mut summary = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Critical => summary.critical += 1,
                Severity::Warning => summary.warning += 1,
                Severity::Info => summary.info += 1,
            }
        }
        summary
    }

    /// Whether the batch must not be written.
    #[must_use]
    pub const fn blocks_writes(&self) -> bool {
        self.critical > 0
    }
}

/// Validates batches against a source (for owned children) and a target.
pub struct ReferenceValidator<'a, S: RecordSource + ?Sized, T: RecordSource + ?Sized> {
    source: &'a S,
    target: &'a T,
    known: HashMap<RecordId, RecordType>,
}

impl<'a, S: RecordSource + ?Sized, T: RecordSource + ?Sized> ReferenceValidator<'a, S, T> {
    pub fn new(source: &'a S, target: &'a T) -> Self {
        Self {
            source,
            target,
            known: HashMap::new(),
        }
    }

    /// Source identities that already have a target counterpart under a
    /// different id. They count as present.
    #[must_use]
    pub fn with_known(mut self, known: HashMap<RecordId, RecordType>) -> Self {
        self.known = known;
        self
    }

    /// Type of `id` if it exists in the batch or the target.
    fn resolve_type(
        &self,
        id: &RecordId,
        batch: &HashMap<RecordId, RecordType>,
    ) -> Result<Option<RecordType>> {
        if let Some(rt) = batch.get(id) {
            return Ok(Some(*rt));
        }
        Ok(self.target.get(id)?.map(|r| r.record_type()))
    }

    /// Validate every record of the batch.
    ///
    /// # Errors
    ///
    /// Returns an error only if a store cannot be read; findings are issues.
    pub fn validate(&self, batch: &[&Record]) -> Result<Vec<ValidationIssue>> {
        let mut members = self.known.clone();
        members.extend(batch.iter().map(|r| (r.id, r.record_type())));
        let mut issues = Vec::new();

        for record in batch {
            self.check_references(record, &members, &mut issues)?;
            self.check_owner(record, &members, &mut issues)?;
            self.check_children(record, &members, &mut issues)?;
            check_completeness(record, &mut issues);
        }

        debug!(
            records = batch.len(),
            issues = issues.len(),
            "Validated batch"
        );
        Ok(issues)
    }

    fn check_references(
        &self,
        record: &Record,
        members: &HashMap<RecordId, RecordType>,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<()> {
        let expected: HashMap<&str, RecordType> =
            record.record_type().reference_fields().iter().copied().collect();
        for (field, id) in record.references() {
            match self.resolve_type(&id, members)? {
                None => issues.push(issue(
                    Severity::Critical,
                    record,
                    format!("{field} references {id}, which is neither in the target nor in this batch"),
                )),
                Some(actual) => {
                    if let Some(want) = expected.get(field.as_str()) {
                        if *want != actual {
                            issues.push(issue(
                                Severity::Warning,
                                record,
                                format!("{field} should reference a {want} but {id} is a {actual}"),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_owner(
        &self,
        record: &Record,
        members: &HashMap<RecordId, RecordType>,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<()> {
        let Some(link) = &record.owner else {
            return Ok(());
        };
        if !members.contains_key(&link.owner) && !self.target.contains(&link.owner)? {
            issues.push(issue(
                Severity::Critical,
                record,
                format!(
                    "owner {} ({}) is neither in the target nor in this batch",
                    link.owner, link.field
                ),
            ));
        }
        Ok(())
    }

    fn check_children(
        &self,
        record: &Record,
        members: &HashMap<RecordId, RecordType>,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<()> {
        for child in self.source.children(&record.id)? {
            if members.contains_key(&child.id) || self.target.contains(&child.id)? {
                continue;
            }
            let field = child.owner.as_ref().map_or("", |o| o.field.as_str());
            issues.push(issue(
                Severity::Warning,
                record,
                format!(
                    "owned {} '{}' ({}) in {field} is not carried and will be missing",
                    child.record_type(),
                    child.label(),
                    child.id.short()
                ),
            ));
        }
        Ok(())
    }
}

fn check_completeness(record: &Record, issues: &mut Vec<ValidationIssue>) {
    let props = record.properties();
    let fields = record.record_type().display_fields();
    if fields
        .iter()
        .all(|f| props.get(*f).is_none_or(crate::model::PropertyValue::is_empty))
    {
        issues.push(issue(
            Severity::Info,
            record,
            format!("{} is empty", fields.join(" and ")),
        ));
    }
}

fn issue(severity: Severity, record: &Record, message: String) -> ValidationIssue {
    ValidationIssue {
        severity,
        record_id: record.id,
        record_type: record.record_type(),
        message,
    }
}
