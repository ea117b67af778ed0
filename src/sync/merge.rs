//! Merge operations: turn resolved changes into target writes.
//!
//! All writes go through [`RecordStore`]. A NEW record is created first and
//! its properties are written afterwards, so the record exists before any
//! property write touches it. Reference properties pointing at batch records
//! that are not written yet are held back as [`PendingPatch`]es and applied
//! in a second pass once every record exists.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{NewRecord, OwnerLink, PropertyMap, RecordId};
use crate::storage::RecordStore;
use crate::sync::resolver::Resolution;
use crate::sync::types::{
    Change, ChangeType, Disposition, PendingPatch, RecordError, RecordOutcome,
};

/// What to do with records that exist only in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionPolicy {
    #[default]
    Ignore,
    DeleteInTarget,
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::DeleteInTarget => write!(f, "delete"),
        }
    }
}

impl FromStr for DeletionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ignore" | "keep" => Ok(Self::Ignore),
            "delete" | "delete-in-target" | "propagate" => Ok(Self::DeleteInTarget),
            other => Err(Error::InvalidArgument(format!(
                "unknown deletion policy '{other}', expected ignore or delete"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub dry_run: bool,
    pub deletion_policy: DeletionPolicy,
    pub fail_fast: bool,
}

/// One change with its resolution and, for NEW owned records, the owner to
/// create it under (already mapped to target identities).
#[derive(Debug, Clone)]
pub struct PlannedWrite {
    pub change: Change,
    pub resolution: Resolution,
    pub owner: Option<OwnerLink>,
}

/// Result of applying one planned write.
#[derive(Debug, Clone)]
pub struct Applied {
    pub outcome: RecordOutcome,
    pub patches: Vec<PendingPatch>,
}

/// Result of a whole batch.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub outcomes: Vec<RecordOutcome>,
    pub errors: Vec<RecordError>,
    pub patches: Vec<PendingPatch>,
    pub cancelled: bool,
    pub aborted: bool,
}

/// Applies resolutions to a target store.
pub struct MergeOperations<'t, T: RecordStore + ?Sized> {
    target: &'t mut T,
    options: MergeOptions,
}

fn outcome(change: &Change, disposition: Disposition) -> RecordOutcome {
    RecordOutcome::new(change.record_id(), change.record_type, &change.label, disposition)
}

impl<'t, T: RecordStore + ?Sized> MergeOperations<'t, T> {
    pub fn new(target: &'t mut T, options: MergeOptions) -> Self {
        Self {
            target,
            options,
        }
    }

    /// Split values into those writable now and patches for references to
    /// records still pending.
    fn split_deferred(
        &self,
        change: &Change,
        record_id: RecordId,
        values: PropertyMap,
        pending: &HashSet<RecordId>,
    ) -> (PropertyMap, Vec<PendingPatch>) {
        let mut now = PropertyMap::new();
        let mut patches = Vec::new();
        for (name, value) in values {
            let waiting: Vec<RecordId> = value
                .referenced_ids()
                .into_iter()
                .filter(|id| *id != record_id && pending.contains(id))
                .collect();
            if waiting.is_empty() {
                now.insert(name, value);
            } else {
                debug!(id = %record_id, field = %name, "Deferring reference write");
                patches.push(PendingPatch {
                    record_id,
                    record_type: change.record_type,
                    field: name,
                    referenced: waiting,
                    value,
                    applied: false,
                });
            }
        }
        (now, patches)
    }

    /// Apply one planned write.
    ///
    /// `pending` holds batch records not written yet; references to them are
    /// returned as patches instead of being written.
    ///
    /// # Errors
    ///
    /// Returns the first store error; the record is then reported as errored
    /// by the caller.
    pub fn apply(&mut self, item: &PlannedWrite, pending: &HashSet<RecordId>) -> Result<Applied> {
        let change = &item.change;
        let skip = |detail: String| Applied {
            outcome: outcome(change, Disposition::Skipped).with_detail(detail),
            patches: Vec::new(),
        };

        match (change.change_type, &item.resolution) {
            (ChangeType::Unchanged, _) => Ok(Applied {
                outcome: outcome(change, Disposition::Unchanged),
                patches: Vec::new(),
            }),

            (ChangeType::Deleted, _) => match self.options.deletion_policy {
                DeletionPolicy::Ignore => Ok(skip("only in target, deletion ignored".to_string())),
                DeletionPolicy::DeleteInTarget => {
                    let id = change
                        .target_id
                        .ok_or_else(|| Error::Other("deleted change without a target record".to_string()))?;
                    if !self.options.dry_run {
                        self.target.delete(&id)?;
                    }
                    info!(id = %id, record_type = %change.record_type, dry_run = self.options.dry_run, "Deleted");
                    Ok(Applied {
                        outcome: outcome(change, Disposition::Deleted),
                        patches: Vec::new(),
                    })
                }
            },

            (_, Resolution::Manual { reason }) => Ok(skip(format!("needs manual review: {reason}"))),
            (_, Resolution::KeepTarget) => Ok(skip("kept target values".to_string())),

            (ChangeType::New, Resolution::Apply(values)) => {
                let id = change
                    .source_id
                    .ok_or_else(|| Error::Other("new change without a source record".to_string()))?;
                let values: PropertyMap = values
                    .iter()
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let (now, patches) = self.split_deferred(change, id, values, pending);
                if !self.options.dry_run {
                    let created = self.target.create(&NewRecord {
                        id,
                        record_type: change.record_type,
                        owner: item.owner.clone(),
                    })?;
                    if !now.is_empty() {
                        if let Err(err) = self.target.update(&created.id, &now) {
                            if let Err(cleanup) = self.target.delete(&created.id) {
                                warn!(id = %id, error = %cleanup, "Could not remove partially created record");
                            }
                            return Err(err);
                        }
                    }
                }
                info!(id = %id, record_type = %change.record_type, dry_run = self.options.dry_run, "Created");
                Ok(Applied {
                    outcome: outcome(change, Disposition::Created),
                    patches,
                })
            }

            (ChangeType::Modified | ChangeType::Conflict, Resolution::Apply(values)) => {
                let id = change
                    .target_id
                    .ok_or_else(|| Error::Other("modified change without a target record".to_string()))?;
                let values: PropertyMap = values
                    .iter()
                    .filter(|(k, v)| change.delta.get(*k).is_some_and(|d| !v.equivalent(&d.target)))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if values.is_empty() {
                    return Ok(skip("resolved to target values".to_string()));
                }
                let (now, patches) = self.split_deferred(change, id, values, pending);
                if !self.options.dry_run && !now.is_empty() {
                    self.target.update(&id, &now)?;
                }
                let fields: Vec<&str> = now
                    .keys()
                    .chain(patches.iter().map(|p| &p.field))
                    .map(String::as_str)
                    .collect();
                info!(id = %id, record_type = %change.record_type, dry_run = self.options.dry_run, "Updated");
                Ok(Applied {
                    outcome: outcome(change, Disposition::Updated).with_detail(fields.join(", ")),
                    patches,
                })
            }
        }
    }

    /// Write one deferred reference.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write fails.
    pub fn apply_patch(&mut self, patch: &PendingPatch) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }
        let mut values = PropertyMap::new();
        values.insert(patch.field.clone(), patch.value.clone());
        self.target.update(&patch.record_id, &values)
    }

    /// Apply a whole plan in order, then the deferred reference patches.
    ///
    /// Every planned record gets exactly one outcome. A set `cancel` flag is
    /// honoured between records; the rest are reported as skipped.
    pub fn run_batch(&mut self, plan: &[PlannedWrite], cancel: Option<&AtomicBool>) -> BatchResult {
        let mut result = BatchResult::default();
        let mut pending: HashSet<RecordId> = plan
            .iter()
            .filter(|p| p.change.change_type == ChangeType::New && matches!(p.resolution, Resolution::Apply(_)))
            .filter_map(|p| p.change.source_id)
            .collect();

        for item in plan {
            if !result.cancelled && !result.aborted && cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                info!("Cancellation requested, stopping before the next record");
                result.cancelled = true;
            }
            if result.cancelled || result.aborted {
                let reason = if result.cancelled { "cancelled" } else { "not attempted after an earlier error" };
                result
                    .outcomes
                    .push(outcome(&item.change, Disposition::Skipped).with_detail(reason));
                continue;
            }

            match self.apply(item, &pending) {
                Ok(applied) => {
                    if applied.outcome.disposition == Disposition::Created {
                        pending.remove(&applied.outcome.record_id);
                    }
                    result.patches.extend(applied.patches);
                    result.outcomes.push(applied.outcome);
                }
                Err(err) => {
                    let id = item.change.record_id();
                    warn!(id = %id, error = %err, "Record failed");
                    result
                        .errors
                        .push(RecordError::from_error(id, item.change.record_type, &err));
                    result
                        .outcomes
                        .push(outcome(&item.change, Disposition::Errored).with_detail(err.to_string()));
                    if self.options.fail_fast {
                        result.aborted = true;
                    }
                }
            }
        }

        if !result.aborted {
            self.apply_patches(&mut result, &pending);
        }
        result
    }

    fn apply_patches(&mut self, result: &mut BatchResult, pending: &HashSet<RecordId>) {
        let mut patches = std::mem::take(&mut result.patches);
        for patch in &mut patches {
            let outcome_index = result.outcomes.iter().position(|o| o.record_id == patch.record_id);
            if outcome_index.is_some_and(|i| result.outcomes[i].disposition == Disposition::Errored) {
                continue;
            }
            let failure = if let Some(missing) = patch.referenced.iter().find(|id| pending.contains(id)) {
                Some(Error::RecordNotFound { id: missing.to_string() })
            } else {
                self.apply_patch(patch).err()
            };
            match failure {
                None => patch.applied = !self.options.dry_run,
                Some(err) => {
                    warn!(id = %patch.record_id, field = %patch.field, error = %err, "Deferred reference failed");
                    result
                        .errors
                        .push(RecordError::from_error(patch.record_id, patch.record_type, &err));
                    if let Some(i) = outcome_index {
                        result.outcomes[i].disposition = Disposition::Errored;
                        result.outcomes[i].detail = Some(format!("{}: {err}", patch.field));
                    }
                }
            }
        }
        result.patches = patches;
    }
}
